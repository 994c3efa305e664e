//! Fixed-size command packets exchanged with the watchdog child.
//!
//! Parent to child: `cmd (1 byte) | arg (u64, native endian) | str_arg
//! (STR_ARG_LEN bytes, NUL padded)`. Child to parent: one `Cmd::Ok` byte.

use crate::error::{AffinityError, Result};
use std::io::{ErrorKind, Read, Write};

/// Size of the string argument buffer, terminating NUL included.
pub const STR_ARG_LEN: usize = 1024;
pub const PACKET_LEN: usize = 1 + 8 + STR_ARG_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cmd {
    Init = 1,
    SetProcAffinity = 2,
    SetNetDevAffinity = 3,
    CleanUp = 4,
    Ok = 5,
}

impl TryFrom<u8> for Cmd {
    type Error = AffinityError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Cmd::Init),
            2 => Ok(Cmd::SetProcAffinity),
            3 => Ok(Cmd::SetNetDevAffinity),
            4 => Ok(Cmd::CleanUp),
            5 => Ok(Cmd::Ok),
            other => Err(AffinityError::InvalidCommand(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub cmd: Cmd,
    pub arg: u64,
    pub str_arg: String,
}

impl Packet {
    pub fn new(cmd: Cmd, arg: u64, str_arg: &str) -> Result<Self> {
        if str_arg.len() >= STR_ARG_LEN {
            return Err(AffinityError::ArgTooLong {
                len: str_arg.len(),
                max: STR_ARG_LEN - 1,
            });
        }
        Ok(Self {
            cmd,
            arg,
            str_arg: str_arg.to_string(),
        })
    }

    pub fn encode(&self) -> [u8; PACKET_LEN] {
        let mut buf = [0u8; PACKET_LEN];
        buf[0] = self.cmd as u8;
        buf[1..9].copy_from_slice(&self.arg.to_ne_bytes());
        let s = self.str_arg.as_bytes();
        let len = s.len().min(STR_ARG_LEN - 1);
        buf[9..9 + len].copy_from_slice(&s[..len]);
        buf
    }

    pub fn decode(buf: &[u8; PACKET_LEN]) -> Result<Self> {
        let cmd = Cmd::try_from(buf[0])?;
        let mut arg = [0u8; 8];
        arg.copy_from_slice(&buf[1..9]);
        let str_buf = &buf[9..];
        let end = str_buf.iter().position(|b| *b == 0).unwrap_or(str_buf.len());
        Ok(Self {
            cmd,
            arg: u64::from_ne_bytes(arg),
            str_arg: String::from_utf8_lossy(&str_buf[..end]).into_owned(),
        })
    }

    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        w.write_all(&self.encode())?;
        w.flush()?;
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self> {
        let mut buf = [0u8; PACKET_LEN];
        read_full(r, &mut buf, false)?;
        Self::decode(&buf)
    }
}

pub fn write_ack(w: &mut impl Write) -> Result<()> {
    w.write_all(&[Cmd::Ok as u8])?;
    w.flush()?;
    Ok(())
}

/// Signals delivered to the parent while it waits are not treated as a
/// dead watchdog.
pub fn read_ack(r: &mut impl Read) -> Result<()> {
    let mut buf = [0u8; 1];
    read_full(r, &mut buf, true)?;
    match Cmd::try_from(buf[0]) {
        Ok(Cmd::Ok) => Ok(()),
        _ => Err(AffinityError::InvalidAck(buf[0])),
    }
}

/// Like `read_exact`. Unless `retry_interrupted`, an interrupted read counts
/// as a closed pipe: that is how a TERM signal ends the child command loop.
fn read_full(r: &mut impl Read, buf: &mut [u8], retry_interrupted: bool) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => return Err(AffinityError::PipeClosed),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {
                if !retry_interrupted {
                    return Err(AffinityError::PipeClosed);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
