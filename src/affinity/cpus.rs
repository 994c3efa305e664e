//! CPU counting and CPU-list parsing.
//!
//! Counts are read once per process: the online processor count from
//! `/proc/cpuinfo` and the configured maximum from the scheduler domain
//! entries under `/proc/sys/kernel/sched_domain`.

use crate::error::{AffinityError, Result};
use once_cell::sync::Lazy;
use std::collections::BTreeSet;
use std::fs;
use tracing::debug;

/// Number of CPUs a mask can address.
pub const MAX_MASK_CPUS: usize = u64::BITS as usize;

fn find_nb_cpus() -> usize {
    let nb_cpus = fs::read_to_string("/proc/cpuinfo")
        .map(|content| count_processor_lines(&content))
        .unwrap_or(0);
    let nb_cpus = if nb_cpus > 0 { nb_cpus } else { sysconf_cpus() };
    debug!("nb_cpus={}", nb_cpus);
    nb_cpus
}

fn find_max_nb_cpus() -> usize {
    let max_nb_cpus = fs::read_dir("/proc/sys/kernel/sched_domain")
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| {
                    e.file_name()
                        .to_str()
                        .and_then(|n| n.strip_prefix("cpu"))
                        .is_some_and(|idx| !idx.is_empty() && idx.chars().all(|c| c.is_ascii_digit()))
                })
                .count()
        })
        .unwrap_or(0);
    debug!("max_nb_cpus={}", max_nb_cpus);
    max_nb_cpus
}

fn sysconf_cpus() -> usize {
    // SAFETY: sysconf is safe to call with _SC_NPROCESSORS_CONF
    // Returns -1 on error, handled by the > 0 check
    let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
    if count > 0 {
        count as usize
    } else {
        1
    }
}

static NB_CPUS: Lazy<usize> = Lazy::new(find_nb_cpus);
static MAX_NB_CPUS: Lazy<usize> = Lazy::new(find_max_nb_cpus);

/// Counts `processor` entries in the content of `/proc/cpuinfo`.
pub fn count_processor_lines(cpuinfo: &str) -> usize {
    cpuinfo
        .lines()
        .filter(|l| l.split_whitespace().next() == Some("processor"))
        .count()
}

/// Online logical CPUs.
pub fn nb_cpus() -> usize {
    *NB_CPUS
}

/// Configured CPUs, falling back to the online count when the scheduler
/// domain entries are not available.
pub fn max_nb_cpus() -> usize {
    match *MAX_NB_CPUS {
        0 => nb_cpus(),
        n => n,
    }
}

/// Bitmask with one bit per online CPU.
pub fn all_cpus_mask() -> u64 {
    mask_for_nb_cpus(nb_cpus())
}

pub fn mask_for_nb_cpus(nb_cpus: usize) -> u64 {
    if nb_cpus >= MAX_MASK_CPUS {
        u64::MAX
    } else {
        (1u64 << nb_cpus) - 1
    }
}

/// Parse a CPU list string (e.g., "0-3,5,7-9") into sorted CPU IDs.
pub fn parse_cpu_list(s: &str) -> Result<Vec<usize>> {
    let mut cpus = BTreeSet::new();

    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start_str, end_str)) = part.split_once('-') {
            let start = parse_cpu_id(start_str, part)?;
            let end = parse_cpu_id(end_str, part)?;
            if start > end {
                return Err(AffinityError::InvalidAffinity(format!(
                    "invalid CPU range: {part}"
                )));
            }
            cpus.extend(start..=end);
        } else {
            cpus.insert(parse_cpu_id(part, part)?);
        }
    }

    Ok(cpus.into_iter().collect())
}

fn parse_cpu_id(s: &str, part: &str) -> Result<usize> {
    s.trim()
        .parse::<usize>()
        .map_err(|_| AffinityError::InvalidAffinity(format!("invalid CPU list entry: {part}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_processor_lines() {
        let cpuinfo = "processor\t: 0\nvendor_id\t: GenuineIntel\n\n\
                       processor\t: 1\nvendor_id\t: GenuineIntel\n\n\
                       processor\t: 2\n";
        assert_eq!(count_processor_lines(cpuinfo), 3);
        assert_eq!(count_processor_lines(""), 0);
        assert_eq!(count_processor_lines("model name : processor X\n"), 0);
    }

    #[test]
    fn test_mask_for_nb_cpus() {
        assert_eq!(mask_for_nb_cpus(1), 0x1);
        assert_eq!(mask_for_nb_cpus(8), 0xff);
        assert_eq!(mask_for_nb_cpus(64), u64::MAX);
        assert_eq!(mask_for_nb_cpus(128), u64::MAX);
    }

    #[test]
    fn test_nb_cpus_positive() {
        assert!(nb_cpus() > 0);
        assert!(max_nb_cpus() >= 1);
        assert_eq!(all_cpus_mask().count_ones() as usize, nb_cpus().min(MAX_MASK_CPUS));
    }

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0").unwrap(), vec![0]);
        assert_eq!(parse_cpu_list("0-3").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(
            parse_cpu_list("0-2,5,7-9").unwrap(),
            vec![0, 1, 2, 5, 7, 8, 9]
        );
        assert_eq!(parse_cpu_list(" 0 - 2 , 5 ").unwrap(), vec![0, 1, 2, 5]);
        assert_eq!(parse_cpu_list("0,1,0,2,1").unwrap(), vec![0, 1, 2]);
        assert_eq!(parse_cpu_list("").unwrap(), Vec::<usize>::new());
        assert_eq!(parse_cpu_list("0,,2").unwrap(), vec![0, 2]);
    }

    #[test]
    fn test_parse_cpu_list_errors() {
        assert!(parse_cpu_list("abc").is_err());
        assert!(parse_cpu_list("0-abc").is_err());
        assert!(parse_cpu_list("-5").is_err());
        assert!(parse_cpu_list("5-").is_err());
        assert!(parse_cpu_list("5-3").is_err());
    }
}
