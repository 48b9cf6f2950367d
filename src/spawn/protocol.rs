use anyhow::{Result, anyhow};
use std::mem::size_of;

/**
 * One command of the spawn-broker protocol.
 *
 * A connection carries any number of configuration commands, then exactly
 * one `Go`, which is accompanied by an SCM_RIGHTS transfer of the target's
 * three stdio descriptors. After `Go` the client may still send `Signal`
 * commands at any time; everything else is fixed. The broker answers with a
 * 4-byte exit status, or closes the connection on abnormal termination.
 *
 * On the wire each command is a native-endian `u32` kind, a native-endian
 * platform word carrying the payload length, and the payload itself.
 * String payloads are nul-terminated.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnCommand {
    /// `NAME=value` environment entry for the target.
    SetEnv(String),
    /// Working directory of the target, inside the prefix's view.
    Chdir(String),
    /// Identity the broker assumes before running the target.
    SetUidGid { uid: u32, gid: u32 },
    /// One argv entry.
    AddArg(String),
    /// Run this binary instead of the login shell.
    SetExec(String),
    /// Start the target; always accompanied by the three descriptors.
    Go,
    /// Deliver a signal to the running target.
    Signal(i32),
}

const KIND_SETENV: u32 = 1;
const KIND_CHDIR: u32 = 2;
const KIND_SETUIDGID: u32 = 3;
const KIND_ADDARG: u32 = 4;
const KIND_SETEXEC: u32 = 5;
const KIND_GO: u32 = 6;
const KIND_SIGNAL: u32 = 7;

const HEADER_LEN: usize = 4 + size_of::<usize>();

impl SpawnCommand {
    pub fn kind(&self) -> u32 {
        match self {
            SpawnCommand::SetEnv(_) => KIND_SETENV,
            SpawnCommand::Chdir(_) => KIND_CHDIR,
            SpawnCommand::SetUidGid { .. } => KIND_SETUIDGID,
            SpawnCommand::AddArg(_) => KIND_ADDARG,
            SpawnCommand::SetExec(_) => KIND_SETEXEC,
            SpawnCommand::Go => KIND_GO,
            SpawnCommand::Signal(_) => KIND_SIGNAL,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            SpawnCommand::SetEnv(s)
            | SpawnCommand::Chdir(s)
            | SpawnCommand::AddArg(s)
            | SpawnCommand::SetExec(s) => {
                let mut payload = s.as_bytes().to_vec();
                payload.push(0);
                payload
            }
            SpawnCommand::SetUidGid { uid, gid } => {
                let mut payload = uid.to_ne_bytes().to_vec();
                payload.extend_from_slice(&gid.to_ne_bytes());
                payload
            }
            SpawnCommand::Go => Vec::new(),
            SpawnCommand::Signal(signo) => signo.to_ne_bytes().to_vec(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let payload = self.payload();
        let mut message = Vec::with_capacity(HEADER_LEN + payload.len());
        message.extend_from_slice(&self.kind().to_ne_bytes());
        message.extend_from_slice(&payload.len().to_ne_bytes());
        message.extend_from_slice(&payload);
        message
    }

    /// Decode one command from the front of `buffer`, returning it along
    /// with the number of bytes consumed.
    pub fn decode(buffer: &[u8]) -> Result<(SpawnCommand, usize)> {
        if buffer.len() < HEADER_LEN {
            return Err(anyhow!("truncated command header"));
        }

        let kind = u32::from_ne_bytes(
            buffer[0..4].try_into().expect("4-byte slice"),
        );
        let length = usize::from_ne_bytes(
            buffer[4..HEADER_LEN].try_into().expect("word-size slice"),
        );

        let end = HEADER_LEN
            .checked_add(length)
            .ok_or_else(|| anyhow!("payload length overflow"))?;
        if buffer.len() < end {
            return Err(anyhow!("truncated command payload"));
        }
        let payload = &buffer[HEADER_LEN..end];

        let command = match kind {
            KIND_SETENV => SpawnCommand::SetEnv(decode_string(payload)?),
            KIND_CHDIR => SpawnCommand::Chdir(decode_string(payload)?),
            KIND_SETUIDGID => {
                if payload.len() != 8 {
                    return Err(anyhow!("bad uid/gid payload"));
                }
                SpawnCommand::SetUidGid {
                    uid: u32::from_ne_bytes(
                        payload[0..4].try_into().expect("4-byte slice"),
                    ),
                    gid: u32::from_ne_bytes(
                        payload[4..8].try_into().expect("4-byte slice"),
                    ),
                }
            }
            KIND_ADDARG => SpawnCommand::AddArg(decode_string(payload)?),
            KIND_SETEXEC => SpawnCommand::SetExec(decode_string(payload)?),
            KIND_GO => {
                if !payload.is_empty() {
                    return Err(anyhow!("go command carries no payload"));
                }
                SpawnCommand::Go
            }
            KIND_SIGNAL => {
                if payload.len() != 4 {
                    return Err(anyhow!("bad signal payload"));
                }
                SpawnCommand::Signal(i32::from_ne_bytes(
                    payload[0..4].try_into().expect("4-byte slice"),
                ))
            }
            other => return Err(anyhow!("unknown command kind {}", other)),
        };

        Ok((command, end))
    }
}

fn decode_string(payload: &[u8]) -> Result<String> {
    match payload.split_last() {
        Some((0, body)) => Ok(String::from_utf8(body.to_vec())?),
        _ => Err(anyhow!("string payload is not nul-terminated")),
    }
}
