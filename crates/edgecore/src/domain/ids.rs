#![forbid(unsafe_code)]

use crate::error::Error;
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};

/// Identifies one stored slice of a recorded stream.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentKey {
    stream_task_id: u64,
    start_secs: u64,
    duration_secs: u32,
}

impl SegmentKey {
    pub fn new(stream_task_id: u64, start_secs: u64, duration_secs: u32) -> Result<Self, Error> {
        if duration_secs == 0 {
            return Err(Error::InvalidInput(format!(
                "segment of task {stream_task_id} at {start_secs}s has zero duration"
            )));
        }
        Ok(Self {
            stream_task_id,
            start_secs,
            duration_secs,
        })
    }

    pub fn stream_task_id(&self) -> u64 {
        self.stream_task_id
    }

    pub fn start_secs(&self) -> u64 {
        self.start_secs
    }

    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    /// Name of this segment inside its task directory.
    pub(crate) fn file_name(&self) -> String {
        format!("{}_{}.seg", self.start_secs, self.duration_secs)
    }

    /// Inverse of [`SegmentKey::file_name`].
    pub(crate) fn from_file_name(stream_task_id: u64, name: &str) -> Option<Self> {
        let stem = name.strip_suffix(".seg")?;
        let (start, duration) = stem.split_once('_')?;
        Self::new(stream_task_id, start.parse().ok()?, duration.parse().ok()?).ok()
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.stream_task_id, self.start_secs, self.duration_secs
        )
    }
}

impl fmt::Debug for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentKey")
            .field("task", &self.stream_task_id)
            .field("start", &self.start_secs)
            .field("duration", &self.duration_secs)
            .finish()
    }
}

impl FromStr for SegmentKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidInput(format!("malformed segment key `{s}`"));
        let mut parts = s.splitn(3, '_');
        let mut next = || parts.next().ok_or_else(invalid);
        let task = next()?.parse().map_err(|_| invalid())?;
        let start = next()?.parse().map_err(|_| invalid())?;
        let duration = next()?.parse().map_err(|_| invalid())?;
        Self::new(task, start, duration)
    }
}

/// 128-bit digest of an input frame.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; ContentHash::LEN]);

impl ContentHash {
    pub const LEN: usize = 16;

    /// Digest `frame`: the leading 16 bytes of its SHA-256.
    pub fn of(frame: &[u8]) -> Self {
        let digest = Sha256::digest(frame);
        let mut bytes = [0u8; Self::LEN];
        bytes.copy_from_slice(&digest[..Self::LEN]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; Self::LEN] = bytes.try_into().map_err(|_| {
            Error::InvalidInput(format!(
                "content hash must be {} bytes, got {}",
                Self::LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContentHash")
            .field(&hex::encode(self.0))
            .finish()
    }
}

impl FromStr for ContentHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|err| Error::InvalidInput(format!("content hash `{s}`: {err}")))?;
        Self::from_bytes(&bytes)
    }
}
