//! Reassembly of chunked file uploads.
//!
//! Chunks may arrive in any order and may repeat. The first chunk seen for a
//! file id fixes the sender, receiver and chunk count; everything after it is
//! checked against that record.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;

use courier_shared::constants::{MAX_FILE_ID_LEN, MAX_TOTAL_CHUNKS};
use courier_shared::UserId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("{0}")]
    InvalidState(String),

    #[error("upload exceeds {max} bytes ({size} received)")]
    TooLarge { size: usize, max: usize },

    #[error("chunk {0} is missing")]
    MissingChunk(u32),
}

/// One decoded chunk, attributed to the connection that sent it.
#[derive(Debug, Clone)]
pub struct ChunkIngest {
    pub sender: UserId,
    pub receiver: UserId,
    pub file_id: String,
    pub file_name: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedFile {
    pub file_id: String,
    pub sender: UserId,
    pub receiver: UserId,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Percentage of chunks stored, one decimal place.
    Progress(f64),
    Complete(CompletedFile),
}

struct Assembly {
    sender: UserId,
    receiver: UserId,
    file_name: String,
    total_chunks: u32,
    chunks: Vec<Option<Vec<u8>>>,
    stored: u32,
    byte_count: usize,
    touched: Instant,
}

impl Assembly {
    fn new(chunk: &ChunkIngest) -> Self {
        Self {
            sender: chunk.sender,
            receiver: chunk.receiver,
            file_name: chunk.file_name.clone(),
            total_chunks: chunk.total_chunks,
            chunks: vec![None; chunk.total_chunks as usize],
            stored: 0,
            byte_count: 0,
            touched: Instant::now(),
        }
    }

    fn progress(&self) -> f64 {
        let pct = f64::from(self.stored) / f64::from(self.total_chunks) * 100.0;
        (pct * 10.0).round() / 10.0
    }
}

pub struct AssemblyEngine {
    assemblies: Mutex<HashMap<String, Assembly>>,
    max_file_size: usize,
}

impl AssemblyEngine {
    pub fn new(max_file_size: usize) -> Self {
        Self {
            assemblies: Mutex::new(HashMap::new()),
            max_file_size,
        }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Assembly>> {
        self.assemblies.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn ingest(&self, chunk: ChunkIngest) -> Result<IngestOutcome, AssemblyError> {
        validate(&chunk)?;

        let finished = {
            let mut map = self.map();
            let assembly = map
                .entry(chunk.file_id.clone())
                .or_insert_with(|| Assembly::new(&chunk));

            if assembly.sender != chunk.sender {
                return Err(AssemblyError::InvalidState(format!(
                    "file {} belongs to another sender",
                    chunk.file_id
                )));
            }
            if assembly.receiver != chunk.receiver {
                return Err(AssemblyError::InvalidState(format!(
                    "file {} is addressed to another receiver",
                    chunk.file_id
                )));
            }
            if assembly.total_chunks != chunk.total_chunks {
                return Err(AssemblyError::InvalidState(format!(
                    "file {} was announced with {} chunks, got {}",
                    chunk.file_id, assembly.total_chunks, chunk.total_chunks
                )));
            }

            let slot = &mut assembly.chunks[chunk.chunk_index as usize];
            let replaced = slot.as_ref().map_or(0, Vec::len);
            let size = assembly.byte_count - replaced + chunk.data.len();

            if size > self.max_file_size {
                map.remove(&chunk.file_id);
                tracing::warn!(file_id = %chunk.file_id, size, max = self.max_file_size, "upload too large, assembly dropped");
                return Err(AssemblyError::TooLarge {
                    size,
                    max: self.max_file_size,
                });
            }

            if slot.is_none() {
                assembly.stored += 1;
            }
            *slot = Some(chunk.data);
            assembly.byte_count = size;
            assembly.touched = Instant::now();

            if assembly.stored < assembly.total_chunks {
                return Ok(IngestOutcome::Progress(assembly.progress()));
            }

            // Last chunk: whoever removes the entry owns the completed file.
            match map.remove(&chunk.file_id) {
                Some(done) => done,
                None => return Err(AssemblyError::InvalidState("assembly vanished".into())),
            }
        };

        let mut bytes = Vec::with_capacity(finished.byte_count);
        for (index, part) in finished.chunks.into_iter().enumerate() {
            match part {
                Some(part) => bytes.extend_from_slice(&part),
                None => return Err(AssemblyError::MissingChunk(index as u32)),
            }
        }

        tracing::debug!(file_id = %chunk.file_id, size = bytes.len(), chunks = finished.total_chunks, "upload reassembled");

        Ok(IngestOutcome::Complete(CompletedFile {
            file_id: chunk.file_id,
            sender: finished.sender,
            receiver: finished.receiver,
            file_name: finished.file_name,
            bytes,
        }))
    }

    /// Drop uploads that have not received a chunk for `max_idle`.
    pub fn purge_stale(&self, max_idle: Duration) -> usize {
        let mut map = self.map();
        let before = map.len();
        map.retain(|_, a| a.touched.elapsed() < max_idle);
        before - map.len()
    }

    pub fn in_flight(&self) -> usize {
        self.map().len()
    }
}

fn validate(chunk: &ChunkIngest) -> Result<(), AssemblyError> {
    if chunk.file_id.is_empty() || chunk.file_id.len() > MAX_FILE_ID_LEN {
        return Err(AssemblyError::InvalidState(format!(
            "file_id must be 1..={MAX_FILE_ID_LEN} bytes"
        )));
    }
    if chunk.total_chunks == 0 || chunk.total_chunks > MAX_TOTAL_CHUNKS {
        return Err(AssemblyError::InvalidState(format!(
            "total_chunks must be 1..={MAX_TOTAL_CHUNKS}"
        )));
    }
    if chunk.chunk_index >= chunk.total_chunks {
        return Err(AssemblyError::InvalidState(format!(
            "chunk_index {} out of range for {} chunks",
            chunk.chunk_index, chunk.total_chunks
        )));
    }
    Ok(())
}
