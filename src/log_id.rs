//! PEL-id allocation and persistence.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

pub const FIRST_PEL_ID: u32 = 0x5000_0001;
pub const LAST_PEL_ID: u32 = 0x50FF_FFFF;

/// Allocates successive PEL ids, wrapping at [`LAST_PEL_ID`] back to
/// [`FIRST_PEL_ID`], persisting the next value to disk on every call so
/// a restart resumes where it left off.
pub struct LogIdGenerator {
    path: std::path::PathBuf,
    next: Mutex<u32>,
}

impl LogIdGenerator {
    /// Loads the next id from `path`. If the file is absent or its
    /// first byte is NUL, rebuilds starting at [`FIRST_PEL_ID`].
    pub fn load(path: impl AsRef<Path>) -> crate::error::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let next = match fs::read(&path) {
            Ok(bytes) if !bytes.is_empty() && bytes[0] != 0 => {
                let text = String::from_utf8_lossy(&bytes);
                text.trim()
                    .trim_start_matches("0x")
                    .parse::<u32>()
                    .or_else(|_| u32::from_str_radix(text.trim().trim_start_matches("0x"), 16))
                    .unwrap_or(FIRST_PEL_ID)
            }
            _ => FIRST_PEL_ID,
        };
        let generator = Self { path, next: Mutex::new(next) };
        generator.persist(next)?;
        Ok(generator)
    }

    fn persist(&self, value: u32) -> crate::error::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        let mut f = fs::File::create(&tmp_path)?;
        write!(f, "{}", value)?;
        f.flush()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Returns the next id and advances the counter, wrapping as needed.
    pub fn next_id(&self) -> crate::error::Result<u32> {
        let mut guard = self.next.lock().expect("lock poisoned");
        let id = *guard;
        let next = if id >= LAST_PEL_ID { FIRST_PEL_ID } else { id + 1 };
        self.persist(next)?;
        *guard = next;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn starts_at_first_pel_id_when_file_absent() {
        let dir = tempdir().unwrap();
        let gen = LogIdGenerator::load(dir.path().join("pelid")).unwrap();
        assert_eq!(gen.next_id().unwrap(), FIRST_PEL_ID);
        assert_eq!(gen.next_id().unwrap(), FIRST_PEL_ID + 1);
    }

    #[test]
    fn ids_are_strictly_increasing_until_wrap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pelid");
        fs::write(&path, (LAST_PEL_ID - 1).to_string()).unwrap();
        let gen = LogIdGenerator::load(&path).unwrap();
        assert_eq!(gen.next_id().unwrap(), LAST_PEL_ID - 1);
        assert_eq!(gen.next_id().unwrap(), LAST_PEL_ID);
        assert_eq!(gen.next_id().unwrap(), FIRST_PEL_ID);
    }

    #[test]
    fn resumes_across_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pelid");
        {
            let gen = LogIdGenerator::load(&path).unwrap();
            gen.next_id().unwrap();
            gen.next_id().unwrap();
        }
        let gen2 = LogIdGenerator::load(&path).unwrap();
        assert_eq!(gen2.next_id().unwrap(), FIRST_PEL_ID + 2);
    }
}
