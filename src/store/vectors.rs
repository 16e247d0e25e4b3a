//! Fixed-width binary vector segments
//!
//! Each segment file holds records of `32 id bytes + dimensions × f32`
//! (little-endian). Segments are written whole into `vectors/.staging/`
//! and renamed into `vectors/` at commit, so readers only ever see
//! complete files. Record width is uniform per repository (dimensions
//! are fixed in the repo metadata).

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::types::StoreError;
use crate::hash;

pub(crate) const SEGMENT_PREFIX: &str = "seg-";
pub(crate) const SEGMENT_SUFFIX: &str = ".bin";
pub(crate) const STAGING_DIR: &str = ".staging";

const ID_BYTES: usize = 32;

/// One decoded record.
#[derive(Debug, Clone)]
pub(crate) struct VectorRecord {
    pub chunk_id: String,
    pub vector: Vec<f32>,
}

pub(crate) fn record_width(dimensions: usize) -> usize {
    ID_BYTES + dimensions * 4
}

/// Encode records into the on-disk form. Ids that do not decode to 32
/// bytes are a programming error upstream and rejected loudly.
pub(crate) fn encode_segment(
    records: &[(String, Vec<f32>)],
    dimensions: usize,
) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::with_capacity(records.len() * record_width(dimensions));
    for (chunk_id, vector) in records {
        let raw = hash::decode_id(chunk_id).ok_or_else(|| StoreError::Corrupt {
            reason: format!("chunk id '{chunk_id}' is not a 64-char hex digest"),
        })?;
        if vector.len() != dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: dimensions,
                actual: vector.len(),
            });
        }
        buf.extend_from_slice(&raw);
        for &x in vector {
            buf.extend_from_slice(&x.to_le_bytes());
        }
    }
    Ok(buf)
}

/// Decode a whole segment file body. A trailing partial record marks
/// the segment corrupt rather than being silently dropped.
pub(crate) fn decode_segment(bytes: &[u8], dimensions: usize) -> Result<Vec<VectorRecord>, StoreError> {
    let width = record_width(dimensions);
    if bytes.len() % width != 0 {
        return Err(StoreError::Corrupt {
            reason: format!(
                "segment length {} is not a multiple of record width {width}",
                bytes.len()
            ),
        });
    }
    let mut records = Vec::with_capacity(bytes.len() / width);
    for rec in bytes.chunks_exact(width) {
        let mut raw = [0u8; ID_BYTES];
        raw.copy_from_slice(&rec[..ID_BYTES]);
        let vector = decode_f32s(&rec[ID_BYTES..]);
        records.push(VectorRecord {
            chunk_id: hash::encode_id(&raw),
            vector,
        });
    }
    Ok(records)
}

/// Reinterpret little-endian f32 bytes. The aligned fast path casts in
/// place; the unaligned fallback copies per component.
fn decode_f32s(bytes: &[u8]) -> Vec<f32> {
    if cfg!(target_endian = "little") {
        if let Ok(slice) = bytemuck::try_cast_slice::<u8, f32>(bytes) {
            return slice.to_vec();
        }
    }
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Write a segment into the staging area and return its staged path.
pub(crate) fn stage_segment(
    vectors_dir: &Path,
    seq: u64,
    body: &[u8],
) -> Result<PathBuf, StoreError> {
    let staging = vectors_dir.join(STAGING_DIR);
    std::fs::create_dir_all(&staging)?;
    let path = staging.join(segment_name(seq));
    let mut file = std::fs::File::create(&path)?;
    file.write_all(body)?;
    file.sync_all()?;
    Ok(path)
}

/// Atomically publish a staged segment.
pub(crate) fn commit_segment(vectors_dir: &Path, staged: &Path) -> Result<PathBuf, StoreError> {
    let name = staged
        .file_name()
        .ok_or_else(|| StoreError::Corrupt {
            reason: "staged segment has no file name".to_string(),
        })?
        .to_os_string();
    let target = vectors_dir.join(&name);
    std::fs::rename(staged, &target)?;
    Ok(target)
}

/// Remove leftover staged segments from an interrupted run.
pub(crate) fn clear_staging(vectors_dir: &Path) -> Result<(), StoreError> {
    let staging = vectors_dir.join(STAGING_DIR);
    match std::fs::read_dir(&staging) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let path = entry.path();
                tracing::debug!(path = %path.display(), "Discarding staged segment");
                let _ = std::fs::remove_file(path);
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// List committed segments, sorted by sequence number.
pub(crate) fn list_segments(vectors_dir: &Path) -> Result<Vec<(u64, PathBuf)>, StoreError> {
    let mut segments = Vec::new();
    let entries = match std::fs::read_dir(vectors_dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(segments),
        Err(e) => return Err(e.into()),
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(seq) = name
            .strip_prefix(SEGMENT_PREFIX)
            .and_then(|s| s.strip_suffix(SEGMENT_SUFFIX))
            .and_then(|s| s.parse::<u64>().ok())
        {
            segments.push((seq, entry.path()));
        }
    }
    segments.sort_by_key(|(seq, _)| *seq);
    Ok(segments)
}

pub(crate) fn next_segment_seq(vectors_dir: &Path) -> Result<u64, StoreError> {
    Ok(list_segments(vectors_dir)?
        .last()
        .map(|(seq, _)| seq + 1)
        .unwrap_or(0))
}

fn segment_name(seq: u64) -> String {
    format!("{SEGMENT_PREFIX}{seq:06}{SEGMENT_SUFFIX}")
}

/// Rewrite the segments that contain any of `victims`, dropping those
/// records. Segments left empty are removed. Untouched segments are not
/// rewritten.
pub(crate) fn remove_records(
    vectors_dir: &Path,
    victims: &HashSet<String>,
    dimensions: usize,
) -> Result<u64, StoreError> {
    let mut removed = 0u64;
    for (seq, path) in list_segments(vectors_dir)? {
        let bytes = std::fs::read(&path)?;
        let records = decode_segment(&bytes, dimensions)?;
        let keep: Vec<&VectorRecord> = records
            .iter()
            .filter(|r| !victims.contains(&r.chunk_id))
            .collect();
        if keep.len() == records.len() {
            continue;
        }
        removed += (records.len() - keep.len()) as u64;

        if keep.is_empty() {
            std::fs::remove_file(&path)?;
            continue;
        }
        let survivors: Vec<(String, Vec<f32>)> = keep
            .into_iter()
            .map(|r| (r.chunk_id.clone(), r.vector.clone()))
            .collect();
        let body = encode_segment(&survivors, dimensions)?;
        let staged = stage_segment(vectors_dir, seq, &body)?;
        commit_segment(vectors_dir, &staged)?;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id(n: u8) -> String {
        hash::content_hash(&[n])
    }

    #[test]
    fn test_segment_roundtrip() {
        let records = vec![
            (id(1), vec![1.0, 0.0, 0.5, -0.25]),
            (id(2), vec![0.1, 0.2, 0.3, 0.4]),
        ];
        let body = encode_segment(&records, 4).unwrap();
        assert_eq!(body.len(), 2 * record_width(4));

        let decoded = decode_segment(&body, 4).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].chunk_id, records[0].0);
        assert_eq!(decoded[0].vector, records[0].1);
        assert_eq!(decoded[1].vector, records[1].1);
    }

    #[test]
    fn test_encode_rejects_wrong_dimensions() {
        let records = vec![(id(1), vec![1.0, 0.0])];
        assert!(matches!(
            encode_segment(&records, 4),
            Err(StoreError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_partial_record() {
        let records = vec![(id(1), vec![1.0, 0.0, 0.0, 0.0])];
        let mut body = encode_segment(&records, 4).unwrap();
        body.pop();
        assert!(matches!(
            decode_segment(&body, 4),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_stage_and_commit() {
        let dir = TempDir::new().unwrap();
        let vectors = dir.path().join("vectors");
        std::fs::create_dir_all(&vectors).unwrap();

        let body = encode_segment(&[(id(1), vec![0.0; 4])], 4).unwrap();
        let staged = stage_segment(&vectors, 0, &body).unwrap();
        assert!(staged.starts_with(vectors.join(STAGING_DIR)));
        assert!(list_segments(&vectors).unwrap().is_empty());

        let committed = commit_segment(&vectors, &staged).unwrap();
        assert!(committed.exists());
        assert_eq!(list_segments(&vectors).unwrap().len(), 1);
        assert_eq!(next_segment_seq(&vectors).unwrap(), 1);
    }

    #[test]
    fn test_clear_staging_discards_leftovers() {
        let dir = TempDir::new().unwrap();
        let vectors = dir.path().join("vectors");
        std::fs::create_dir_all(&vectors).unwrap();
        let body = encode_segment(&[(id(1), vec![0.0; 4])], 4).unwrap();
        stage_segment(&vectors, 3, &body).unwrap();

        clear_staging(&vectors).unwrap();
        assert!(list_segments(&vectors).unwrap().is_empty());
        let staging_empty = std::fs::read_dir(vectors.join(STAGING_DIR))
            .map(|mut d| d.next().is_none())
            .unwrap_or(true);
        assert!(staging_empty);
    }

    #[test]
    fn test_remove_records_rewrites_only_touched_segments() {
        let dir = TempDir::new().unwrap();
        let vectors = dir.path().join("vectors");
        std::fs::create_dir_all(&vectors).unwrap();

        let seg0 = encode_segment(&[(id(1), vec![0.0; 4]), (id(2), vec![1.0; 4])], 4).unwrap();
        commit_segment(&vectors, &stage_segment(&vectors, 0, &seg0).unwrap()).unwrap();
        let seg1 = encode_segment(&[(id(3), vec![2.0; 4])], 4).unwrap();
        commit_segment(&vectors, &stage_segment(&vectors, 1, &seg1).unwrap()).unwrap();

        let untouched_before = std::fs::read(vectors.join("seg-000001.bin")).unwrap();

        let victims: HashSet<String> = [id(1)].into_iter().collect();
        let removed = remove_records(&vectors, &victims, 4).unwrap();
        assert_eq!(removed, 1);

        let seg0_after = decode_segment(&std::fs::read(vectors.join("seg-000000.bin")).unwrap(), 4)
            .unwrap();
        assert_eq!(seg0_after.len(), 1);
        assert_eq!(seg0_after[0].chunk_id, id(2));
        // Segment 1 was not rewritten
        assert_eq!(
            std::fs::read(vectors.join("seg-000001.bin")).unwrap(),
            untouched_before
        );
    }

    #[test]
    fn test_remove_all_records_deletes_segment() {
        let dir = TempDir::new().unwrap();
        let vectors = dir.path().join("vectors");
        std::fs::create_dir_all(&vectors).unwrap();
        let seg = encode_segment(&[(id(1), vec![0.0; 4])], 4).unwrap();
        commit_segment(&vectors, &stage_segment(&vectors, 0, &seg).unwrap()).unwrap();

        let victims: HashSet<String> = [id(1)].into_iter().collect();
        remove_records(&vectors, &victims, 4).unwrap();
        assert!(list_segments(&vectors).unwrap().is_empty());
    }
}
