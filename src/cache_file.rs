// src/cache_file.rs
//! On-disk format of the state cache.
//!
//! ```text
//! header : { version: u32 LE, key_size: u32 LE }
//! record : { digest: [u8; 32], key: [u8; key_size] }   repeated until EOF
//! ```
//!
//! The key bytes are a raw snapshot of [`PipelineStateKey`] for the current
//! build. A header that does not match this build discards the whole file. A
//! record whose digest does not match its bytes is skipped on its own, and a
//! short read at the tail (a crash mid-append) ends the log. [`load_or_init`]
//! cuts such a tail off so later appends stay aligned.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Error, Result};
use crate::key::{KeyDigest, PipelineStateKey, DIGEST_SIZE};

/// Bumped whenever the record framing changes. Key layout changes are caught
/// by the key size in the header.
pub const CACHE_VERSION: u32 = 2;

/// File extension of state cache files.
pub const CACHE_EXTENSION: &str = "scache";

// ----------------------------------------------------------------------------
// Header
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHeader {
    pub version: u32,
    pub key_size: u32,
}

impl CacheHeader {
    pub const SIZE: usize = 8;

    /// Header this build writes and accepts.
    pub fn current() -> Self {
        Self {
            version: CACHE_VERSION,
            key_size: PipelineStateKey::SIZE as u32,
        }
    }

    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut bytes = [0u8; Self::SIZE];
        reader.read_exact(&mut bytes)?;
        Ok(Self {
            version: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            key_size: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..4].copy_from_slice(&self.version.to_le_bytes());
        bytes[4..].copy_from_slice(&self.key_size.to_le_bytes());
        writer.write_all(&bytes)
    }

    /// Fails with [`Error::LayoutMismatch`] unless this build can read the records.
    pub fn check(&self) -> Result<()> {
        let expected = Self::current();
        if *self == expected {
            Ok(())
        } else {
            Err(Error::LayoutMismatch {
                found_version: self.version,
                found_key_size: self.key_size,
                expected_version: expected.version,
                expected_key_size: expected.key_size,
            })
        }
    }
}

// ----------------------------------------------------------------------------
// Records
// ----------------------------------------------------------------------------

/// Everything that survived reading a cache file.
#[derive(Debug, Default, Clone)]
pub struct CacheContents {
    /// Accepted keys in file order. May contain duplicates.
    pub keys: Vec<PipelineStateKey>,
    /// Records dropped because their digest did not match.
    pub skipped: usize,
    /// Offset just past the last complete record. Includes the header when
    /// read through [`read_cache`]. Anything beyond it is a torn append.
    pub end_offset: u64,
}

/// Encodes one record into a single buffer so it hits the file in one write.
pub fn encode_record(key: &PipelineStateKey) -> Vec<u8> {
    let mut record = Vec::with_capacity(DIGEST_SIZE + PipelineStateKey::SIZE);
    record.extend_from_slice(&key.digest());
    record.extend_from_slice(key.as_bytes());
    record
}

pub fn write_record<W: Write>(writer: &mut W, key: &PipelineStateKey) -> io::Result<()> {
    writer.write_all(&encode_record(key))?;
    writer.flush()
}

/// Reads records until the stream runs dry. Never fails: a short read ends
/// the log and a bad digest drops a single record.
pub fn read_records<R: Read>(reader: &mut R) -> CacheContents {
    let mut contents = CacheContents::default();
    let mut digest: KeyDigest = [0; DIGEST_SIZE];
    let mut key_bytes = vec![0u8; PipelineStateKey::SIZE];

    loop {
        if reader.read_exact(&mut digest).is_err() || reader.read_exact(&mut key_bytes).is_err() {
            break;
        }

        let Some(key) = PipelineStateKey::from_bytes(&key_bytes) else {
            break;
        };

        contents.end_offset += (DIGEST_SIZE + PipelineStateKey::SIZE) as u64;

        if key.digest() != digest {
            debug!("state cache: skipping record {} (digest mismatch)", contents.keys.len() + contents.skipped);
            contents.skipped += 1;
            continue;
        }

        contents.keys.push(key);
    }

    contents
}

/// Header check plus [`read_records`].
pub fn read_cache<R: Read>(reader: &mut R) -> Result<CacheContents> {
    CacheHeader::read(reader)?.check()?;
    let mut contents = read_records(reader);
    contents.end_offset += CacheHeader::SIZE as u64;
    Ok(contents)
}

pub fn read_cache_file(path: &Path) -> Result<CacheContents> {
    let file = File::open(path)?;
    read_cache(&mut BufReader::new(file))
}

/// Truncates `path` and writes a fresh header.
pub fn init_cache_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    CacheHeader::current().write(&mut file)?;
    file.flush()?;
    Ok(())
}

/// Reads `path`, or replaces it with an empty cache if it is missing,
/// unreadable or from another build. Never fails; worst case is an empty,
/// unpersisted cache.
pub fn load_or_init(path: &Path) -> CacheContents {
    match read_cache_file(path) {
        Ok(contents) => {
            info!(
                "state cache: read {} entries from {} ({} skipped)",
                contents.keys.len(),
                path.display(),
                contents.skipped
            );
            match trim_torn_tail(path, contents.end_offset) {
                Ok(()) => return contents,
                Err(e) => warn!("state cache: cannot trim {}: {}", path.display(), e),
            }
        }
        Err(e) if e.is_not_found() => {
            info!("state cache: no cache file at {}", path.display());
        }
        Err(e) => {
            warn!("state cache: discarding {}: {}", path.display(), e);
        }
    }

    info!("state cache: initializing cache file {}", path.display());
    if let Err(e) = init_cache_file(path) {
        warn!("state cache: failed to initialize {}: {}", path.display(), e);
    }
    CacheContents::default()
}

/// Cuts a partial record left by an interrupted append, so the next append
/// starts on a record boundary.
fn trim_torn_tail(path: &Path, end_offset: u64) -> Result<()> {
    let len = fs::metadata(path)?.len();
    if len > end_offset {
        warn!(
            "state cache: dropping {} bytes of torn record at the end of {}",
            len - end_offset,
            path.display()
        );
        OpenOptions::new().write(true).open(path)?.set_len(end_offset)?;
    }
    Ok(())
}

/// Opens an existing cache file for appending records.
pub fn open_for_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| Error::from(e).context(format!("opening {} for append", path.display())))
}

// ----------------------------------------------------------------------------
// Location
// ----------------------------------------------------------------------------

/// `<hash of exe_name>.scache`. The name only has to be stable per executable.
pub fn cache_file_name(exe_name: &str) -> String {
    format!("{:016x}.{}", xxh3_64(exe_name.as_bytes()), CACHE_EXTENSION)
}

/// Per-executable cache location inside the temp directory, or `None` if the
/// executable name cannot be determined.
pub fn default_cache_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let exe_name = exe.file_name()?.to_string_lossy().into_owned();
    Some(std::env::temp_dir().join("slop").join(cache_file_name(&exe_name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{ShaderKey, ShaderStage};
    use crate::state::{Format, RenderPassFormat, StateVector};
    use std::io::Cursor;

    fn key(n: u32) -> PipelineStateKey {
        let mut shaders = [ShaderKey::undefined(); 5];
        shaders[0] = ShaderKey::from_code(ShaderStage::Vertex, &n.to_le_bytes());
        let mut state = StateVector::default();
        state.input_assembly.patch_vertex_count = n;
        PipelineStateKey::new(shaders, state, RenderPassFormat::single(Format::B8G8R8A8_UNORM, Format::UNDEFINED))
    }

    fn file_with(keys: &[PipelineStateKey]) -> Vec<u8> {
        let mut bytes = Vec::new();
        CacheHeader::current().write(&mut bytes).unwrap();
        for k in keys {
            write_record(&mut bytes, k).unwrap();
        }
        bytes
    }

    #[test]
    fn round_trip_through_bytes() {
        let keys = [key(1), key(2)];
        let contents = read_cache(&mut Cursor::new(file_with(&keys))).unwrap();
        assert_eq!(contents.keys, keys);
        assert_eq!(contents.skipped, 0);
    }

    #[test]
    fn corrupted_record_is_isolated() {
        let keys = [key(1), key(2), key(3)];
        let mut bytes = file_with(&keys);
        let record = DIGEST_SIZE + PipelineStateKey::SIZE;
        // flip one bit inside the second record's key bytes
        let target = CacheHeader::SIZE + record + DIGEST_SIZE + 17;
        bytes[target] ^= 0x10;

        let contents = read_cache(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(contents.keys, vec![keys[0], keys[2]]);
        assert_eq!(contents.skipped, 1);
    }

    #[test]
    fn truncated_tail_is_not_an_error() {
        let keys = [key(1), key(2), key(3)];
        let mut bytes = file_with(&keys);
        bytes.truncate(bytes.len() - PipelineStateKey::SIZE / 2);

        let contents = read_cache(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(contents.keys, vec![keys[0], keys[1]]);
        assert_eq!(contents.skipped, 0);
        assert_eq!(contents.end_offset as usize, file_with(&keys[..2]).len());
    }

    #[test]
    fn load_or_init_trims_torn_tail_before_appending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torn.scache");
        let mut bytes = file_with(&[key(1), key(2)]);
        bytes.extend_from_slice(&[0xab; 10]);
        fs::write(&path, &bytes).unwrap();

        let contents = load_or_init(&path);
        assert_eq!(contents.keys, vec![key(1), key(2)]);
        assert_eq!(fs::metadata(&path).unwrap().len(), contents.end_offset);

        let mut file = open_for_append(&path).unwrap();
        write_record(&mut file, &key(3)).unwrap();
        drop(file);

        let reloaded = read_cache_file(&path).unwrap();
        assert_eq!(reloaded.keys, vec![key(1), key(2), key(3)]);
        assert_eq!(reloaded.skipped, 0);
    }

    #[test]
    fn layout_mismatch_rejects_the_file() {
        let mut bytes = Vec::new();
        CacheHeader {
            version: CACHE_VERSION,
            key_size: PipelineStateKey::SIZE as u32 + 4,
        }
        .write(&mut bytes)
        .unwrap();
        write_record(&mut bytes, &key(1)).unwrap();

        let err = read_cache(&mut Cursor::new(bytes)).unwrap_err();
        assert!(err.is_layout_mismatch());
    }

    #[test]
    fn load_or_init_replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.scache");
        fs::write(&path, [1u8, 0, 0, 0, 9, 9, 9, 9, 42]).unwrap();

        let contents = load_or_init(&path);
        assert!(contents.keys.is_empty());

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), CacheHeader::SIZE);
        assert_eq!(CacheHeader::read(&mut Cursor::new(bytes)).unwrap(), CacheHeader::current());
    }

    #[test]
    fn load_or_init_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fresh.scache");

        assert!(load_or_init(&path).keys.is_empty());
        assert!(read_cache_file(&path).unwrap().keys.is_empty());
    }

    #[test]
    fn cache_file_name_is_stable() {
        assert_eq!(cache_file_name("game.exe"), cache_file_name("game.exe"));
        assert_ne!(cache_file_name("game.exe"), cache_file_name("other.exe"));
        assert!(cache_file_name("game.exe").ends_with(".scache"));
    }
}
