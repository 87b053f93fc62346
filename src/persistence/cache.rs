//! Index Cache
//!
//! On-disk storage of one built index per category, so restarts can skip
//! recomputation.
//!
//! Each category `c` owns two artifacts written as one unit:
//! - `c.vec`: header + row-major f32 matrix (little-endian)
//! - `c.ids`: one entity id per line, line `i` == row `i`
//!
//! Header layout of `c.vec`:
//! - Magic: 4 bytes "SDXV"
//! - Version: 1 byte
//! - Category tag: 1 byte
//! - Dimension: 4 bytes
//! - Row count: 4 bytes
//! - Built at: 8 bytes (unix millis)
//! - SHA-256 of the ids artifact: 32 bytes
//! - SHA-256 of the vector payload: 32 bytes

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{IndexError, Result};
use crate::index::{Category, FlatIndex};

const CACHE_MAGIC: &[u8; 4] = b"SDXV";
const CACHE_VERSION: u8 = 1;
const DIGEST_LEN: usize = 32;
const HEADER_LEN: usize = 4 + 1 + 1 + 4 + 4 + 8 + DIGEST_LEN * 2;

/// Per-category index persistence rooted at one directory
#[derive(Debug, Clone)]
pub struct IndexCache {
    dir: PathBuf,
}

impl IndexCache {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the vector artifact for `category`
    pub fn vectors_path(&self, category: Category) -> PathBuf {
        self.dir.join(format!("{}.vec", category.as_str()))
    }

    /// Path of the id artifact for `category`
    pub fn ids_path(&self, category: Category) -> PathBuf {
        self.dir.join(format!("{}.ids", category.as_str()))
    }

    /// Whether both artifacts for `category` exist
    pub fn exists(&self, category: Category) -> bool {
        self.vectors_path(category).exists() && self.ids_path(category).exists()
    }

    /// Persist `index` under its category, replacing any previous pair.
    pub fn save(&self, index: &FlatIndex) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let category = index.category();

        let ids = encode_ids(index.ids())?;
        let vectors = encode_vectors(index, &ids);

        let ids_path = self.ids_path(category);
        let vectors_path = self.vectors_path(category);
        let ids_tmp = ids_path.with_extension("ids.tmp");
        let vectors_tmp = vectors_path.with_extension("vec.tmp");

        write_synced(&ids_tmp, &ids)?;
        write_synced(&vectors_tmp, &vectors)?;
        // A crash between the renames leaves digests that no longer agree,
        // which the next load rejects.
        fs::rename(&ids_tmp, &ids_path)?;
        fs::rename(&vectors_tmp, &vectors_path)?;

        debug!(
            category = %category,
            rows = index.len(),
            path = %vectors_path.display(),
            "Index cache saved"
        );
        Ok(())
    }

    /// Load the cached index for `category`.
    ///
    /// `Ok(None)` when nothing is cached; `Err` when the artifacts are
    /// damaged, disagree with each other, or were written for another
    /// dimension.
    pub fn load(&self, category: Category, dimension: usize) -> Result<Option<FlatIndex>> {
        let vectors_path = self.vectors_path(category);
        let ids_path = self.ids_path(category);

        let vectors = match read_optional(&vectors_path)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let ids = match read_optional(&ids_path)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        decode(category, dimension, &vectors, &ids).map(Some)
    }

    /// Delete both artifacts for `category`, if present
    pub fn remove(&self, category: Category) -> Result<()> {
        for path in [self.vectors_path(category), self.ids_path(category)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn encode_ids(ids: &[String]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(ids.iter().map(|id| id.len() + 1).sum());
    for id in ids {
        if id.contains(['\n', '\r']) {
            return Err(IndexError::InvalidFormat(format!(
                "entity id contains a line break: {id:?}"
            )));
        }
        out.extend_from_slice(id.as_bytes());
        out.push(b'\n');
    }
    Ok(out)
}

fn encode_vectors(index: &FlatIndex, ids: &[u8]) -> Vec<u8> {
    let raw = index.raw_vectors();
    let mut payload = BytesMut::with_capacity(raw.len() * 4);
    for x in raw {
        payload.put_f32_le(*x);
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_slice(CACHE_MAGIC);
    buf.put_u8(CACHE_VERSION);
    buf.put_u8(index.category().tag());
    buf.put_u32_le(index.dimension() as u32);
    buf.put_u32_le(index.len() as u32);
    buf.put_i64_le(index.built_at().timestamp_millis());
    buf.put_slice(&Sha256::digest(ids));
    buf.put_slice(&Sha256::digest(&payload));
    buf.put_slice(&payload);
    buf.to_vec()
}

fn decode(category: Category, dimension: usize, vectors: &[u8], ids: &[u8]) -> Result<FlatIndex> {
    if vectors.len() < HEADER_LEN {
        return Err(invalid("truncated header"));
    }
    let mut buf = vectors;

    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if &magic != CACHE_MAGIC {
        return Err(invalid("bad magic"));
    }

    let version = buf.get_u8();
    if version != CACHE_VERSION {
        return Err(IndexError::VersionMismatch {
            expected: CACHE_VERSION,
            actual: version,
        });
    }

    let tag = buf.get_u8();
    if Category::from_tag(tag) != Some(category) {
        return Err(invalid(format!("category tag {tag} does not match {category}")));
    }

    let stored_dimension = buf.get_u32_le() as usize;
    if stored_dimension != dimension {
        return Err(invalid(format!(
            "dimension {stored_dimension} does not match configured {dimension}"
        )));
    }

    let count = buf.get_u32_le() as usize;
    let built_millis = buf.get_i64_le();
    let built_at = DateTime::<Utc>::from_timestamp_millis(built_millis)
        .ok_or_else(|| invalid(format!("timestamp out of range: {built_millis}")))?;

    let mut ids_digest = [0u8; DIGEST_LEN];
    buf.copy_to_slice(&mut ids_digest);
    let mut payload_digest = [0u8; DIGEST_LEN];
    buf.copy_to_slice(&mut payload_digest);

    let expected_payload = count
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| invalid("row count overflows"))?;
    if buf.remaining() != expected_payload {
        return Err(invalid(format!(
            "payload is {} bytes, expected {expected_payload}",
            buf.remaining()
        )));
    }
    if Sha256::digest(buf).as_slice() != payload_digest {
        return Err(invalid("vector payload digest mismatch"));
    }
    if Sha256::digest(ids).as_slice() != ids_digest {
        return Err(invalid("id list digest mismatch"));
    }

    let text = std::str::from_utf8(ids).map_err(|e| invalid(format!("ids not UTF-8: {e}")))?;
    let id_list: Vec<String> = text.lines().map(str::to_owned).collect();
    if id_list.len() != count {
        return Err(invalid(format!(
            "{} ids for {count} vectors",
            id_list.len()
        )));
    }

    let mut matrix = Vec::with_capacity(count * dimension);
    while buf.has_remaining() {
        matrix.push(buf.get_f32_le());
    }

    FlatIndex::from_parts(category, dimension, matrix, id_list, built_at)
}

fn invalid(msg: impl Into<String>) -> IndexError {
    IndexError::InvalidFormat(msg.into())
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{EmbeddingRecord, IndexBuilder};
    use tempfile::tempdir;

    fn code_index() -> FlatIndex {
        let records = vec![
            EmbeddingRecord::code("cs-354", vec![vec![1.0, 2.0, 3.0], vec![0.5, 0.0, 0.1]]),
            EmbeddingRecord::code("math-221", vec![vec![0.0, -1.0, 4.0]]),
        ];
        IndexBuilder::new(3)
            .build(Category::Code, &records)
            .unwrap()
            .0
            .unwrap()
    }

    #[test]
    fn test_save_load() {
        let dir = tempdir().unwrap();
        let cache = IndexCache::new(dir.path());
        let index = code_index();

        cache.save(&index).unwrap();
        assert!(cache.exists(Category::Code));
        assert!(!cache.exists(Category::Title));

        let loaded = cache.load(Category::Code, 3).unwrap().unwrap();
        assert_eq!(loaded.ids(), index.ids());
        assert_eq!(loaded.raw_vectors(), index.raw_vectors());
        assert_eq!(
            loaded.built_at().timestamp_millis(),
            index.built_at().timestamp_millis()
        );

        let ids = fs::read_to_string(cache.ids_path(Category::Code)).unwrap();
        assert_eq!(ids, "cs-354\ncs-354\nmath-221\n");
    }

    #[test]
    fn test_missing_cache_is_none() {
        let dir = tempdir().unwrap();
        let cache = IndexCache::new(dir.path().join("absent"));
        assert!(cache.load(Category::Title, 3).unwrap().is_none());
    }

    #[test]
    fn test_id_count_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let cache = IndexCache::new(dir.path());
        cache.save(&code_index()).unwrap();

        fs::write(cache.ids_path(Category::Code), "cs-354\nmath-221\n").unwrap();
        let err = cache.load(Category::Code, 3).unwrap_err();
        assert!(err.is_cache_corruption());
    }

    #[test]
    fn test_truncated_vectors_rejected() {
        let dir = tempdir().unwrap();
        let cache = IndexCache::new(dir.path());
        cache.save(&code_index()).unwrap();

        let path = cache.vectors_path(Category::Code);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();
        assert!(cache.load(Category::Code, 3).unwrap_err().is_cache_corruption());

        fs::write(&path, &bytes[..10]).unwrap();
        assert!(cache.load(Category::Code, 3).unwrap_err().is_cache_corruption());
    }

    #[test]
    fn test_flipped_payload_byte_rejected() {
        let dir = tempdir().unwrap();
        let cache = IndexCache::new(dir.path());
        cache.save(&code_index()).unwrap();

        let path = cache.vectors_path(Category::Code);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();
        assert!(cache.load(Category::Code, 3).unwrap_err().is_cache_corruption());
    }

    #[test]
    fn test_version_and_dimension_checked() {
        let dir = tempdir().unwrap();
        let cache = IndexCache::new(dir.path());
        cache.save(&code_index()).unwrap();

        assert!(cache.load(Category::Code, 4).unwrap_err().is_cache_corruption());

        let path = cache.vectors_path(Category::Code);
        let mut bytes = fs::read(&path).unwrap();
        bytes[4] = CACHE_VERSION + 1;
        fs::write(&path, bytes).unwrap();
        assert!(matches!(
            cache.load(Category::Code, 3).unwrap_err(),
            IndexError::VersionMismatch { .. }
        ));
    }

    #[test]
    fn test_newline_in_id_rejected() {
        let dir = tempdir().unwrap();
        let cache = IndexCache::new(dir.path());
        let records = vec![EmbeddingRecord::title("bad\nid", vec![1.0])];
        let index = IndexBuilder::new(1)
            .build(Category::Title, &records)
            .unwrap()
            .0
            .unwrap();
        assert!(cache.save(&index).is_err());
        assert!(!cache.exists(Category::Title));
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        let cache = IndexCache::new(dir.path());
        cache.save(&code_index()).unwrap();
        cache.remove(Category::Code).unwrap();
        assert!(!cache.exists(Category::Code));
        cache.remove(Category::Code).unwrap();
    }
}
