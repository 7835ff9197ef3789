//! Local save-slot store.
//!
//! Five slots of checksummed binary records. A slot that fails the magic,
//! checksum or schema-version check is treated as absent; the other slots
//! are unaffected. Writing past capacity evicts the slot with the oldest
//! timestamp.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use directories::ProjectDirs;
use log::{info, warn};
use sha2::{Digest, Sha256};
use thiserror::Error;

use delve_shared::{SaveData, MAX_SAVE_SLOTS};

/// File format magic ("DELVESAV")
const SAVE_MAGIC: u64 = 0x44454C5645534156;

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("could not determine save directory")]
    NoSaveDir,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Encode(#[from] bincode::Error),
}

/// Manages the save slots on disk
pub struct SaveStore {
    dir: PathBuf,
}

impl SaveStore {
    /// Open the store at the platform save location
    pub fn new() -> Result<Self, SaveError> {
        let project_dirs = ProjectDirs::from("", "", "delve").ok_or(SaveError::NoSaveDir)?;
        let dir = project_dirs.data_dir().join("saves");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Open a store rooted at an explicit directory (tests, tooling)
    pub fn with_dir(dir: PathBuf) -> Result<Self, SaveError> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn slot_path(&self, slot: usize) -> PathBuf {
        self.dir.join(format!("slot_{}.sav", slot))
    }

    /// Write a record into a specific slot.
    ///
    /// File layout: magic (8 bytes), data length (4 bytes), bincode data,
    /// SHA256 checksum over everything before it (32 bytes).
    pub fn write_slot(&self, slot: usize, save: &SaveData) -> Result<(), SaveError> {
        let data = bincode::serialize(save)?;
        let data_len = data.len() as u32;

        let mut hasher = Sha256::new();
        hasher.update(SAVE_MAGIC.to_le_bytes());
        hasher.update(data_len.to_le_bytes());
        hasher.update(&data);
        let checksum = hasher.finalize();

        let mut file = fs::File::create(self.slot_path(slot))?;
        file.write_all(&SAVE_MAGIC.to_le_bytes())?;
        file.write_all(&data_len.to_le_bytes())?;
        file.write_all(&data)?;
        file.write_all(&checksum)?;
        Ok(())
    }

    /// Read one slot. Any failure (missing file, bad magic, bad checksum,
    /// wrong schema version) reads as an empty slot.
    pub fn read_slot(&self, slot: usize) -> Option<SaveData> {
        let path = self.slot_path(slot);
        let mut file = fs::File::open(&path).ok()?;

        let mut magic_bytes = [0u8; 8];
        file.read_exact(&mut magic_bytes).ok()?;
        if u64::from_le_bytes(magic_bytes) != SAVE_MAGIC {
            warn!("slot {}: bad magic, treating as empty", slot);
            return None;
        }

        let mut len_bytes = [0u8; 4];
        file.read_exact(&mut len_bytes).ok()?;
        let data_len = u32::from_le_bytes(len_bytes) as usize;
        if data_len > 16 * 1024 * 1024 {
            warn!("slot {}: implausible length, treating as empty", slot);
            return None;
        }

        let mut data = vec![0u8; data_len];
        file.read_exact(&mut data).ok()?;

        let mut stored_checksum = [0u8; 32];
        file.read_exact(&mut stored_checksum).ok()?;

        let mut hasher = Sha256::new();
        hasher.update(magic_bytes);
        hasher.update(len_bytes);
        hasher.update(&data);
        if hasher.finalize().as_slice() != stored_checksum {
            warn!("slot {}: checksum mismatch, treating as empty", slot);
            return None;
        }

        let save: SaveData = bincode::deserialize(&data).ok()?;
        if !save.is_current_version() {
            warn!(
                "slot {}: save version {} unsupported, treating as empty",
                slot, save.version
            );
            return None;
        }
        Some(save)
    }

    /// All slots in order; unreadable slots read as `None`
    pub fn list(&self) -> Vec<Option<SaveData>> {
        (0..MAX_SAVE_SLOTS).map(|slot| self.read_slot(slot)).collect()
    }

    /// Store a record: into the first empty slot, or over the slot with
    /// the oldest timestamp once all five are full. Returns the slot used.
    pub fn store(&self, save: &SaveData) -> Result<usize, SaveError> {
        let slots = self.list();
        let slot = match slots.iter().position(|s| s.is_none()) {
            Some(empty) => empty,
            None => slots
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| s.as_ref().map(|d| d.timestamp).unwrap_or(i64::MIN))
                .map(|(i, _)| i)
                .unwrap_or(0),
        };
        self.write_slot(slot, save)?;
        info!("saved '{}' into slot {}", save.player_name, slot);
        Ok(slot)
    }

    /// Delete one slot (character exhausted, or explicit removal).
    /// Idempotent: deleting an empty slot is fine.
    pub fn delete_slot(&self, slot: usize) -> Result<(), SaveError> {
        let path = self.slot_path(slot);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Find the slot holding a named character
    pub fn find_by_name(&self, player_name: &str) -> Option<usize> {
        self.list()
            .iter()
            .position(|s| s.as_ref().map(|d| d.player_name == player_name).unwrap_or(false))
    }

    /// Delete a named character's slot, the response to a
    /// character-exhausted event. Returns whether a slot was removed.
    pub fn delete_by_name(&self, player_name: &str) -> Result<bool, SaveError> {
        match self.find_by_name(player_name) {
            Some(slot) => {
                self.delete_slot(slot)?;
                info!("deleted exhausted character '{}' from slot {}", player_name, slot);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_shared::ClassId;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Unique temp dir per test
    fn test_store() -> SaveStore {
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "delve-save-test-{}-{}",
            std::process::id(),
            test_id
        ));
        let _ = fs::remove_dir_all(&dir);
        SaveStore::with_dir(dir).unwrap()
    }

    fn save(name: &str, timestamp: i64) -> SaveData {
        let mut s = SaveData::new_character(name.into(), ClassId::Warrior);
        s.timestamp = timestamp;
        s
    }

    #[test]
    fn roundtrip_preserves_the_record() {
        let store = test_store();
        let original = save("Aldric", 100);
        store.write_slot(0, &original).unwrap();
        let loaded = store.read_slot(0).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn sixth_save_evicts_exactly_the_oldest_slot() {
        let store = test_store();
        // Fill all five slots; slot 2 holds the oldest timestamp
        let timestamps = [50i64, 40, 10, 30, 20];
        for (i, ts) in timestamps.iter().enumerate() {
            store.write_slot(i, &save(&format!("hero-{}", i), *ts)).unwrap();
        }

        let slot = store.store(&save("newcomer", 60)).unwrap();
        assert_eq!(slot, 2, "the oldest-timestamped slot is evicted");

        let slots = store.list();
        assert_eq!(slots[2].as_ref().unwrap().player_name, "newcomer");
        // The other four are untouched
        for (i, ts) in timestamps.iter().enumerate() {
            if i != 2 {
                assert_eq!(slots[i].as_ref().unwrap().timestamp, *ts);
            }
        }
    }

    #[test]
    fn store_prefers_empty_slots() {
        let store = test_store();
        store.write_slot(0, &save("first", 10)).unwrap();
        let slot = store.store(&save("second", 20)).unwrap();
        assert_eq!(slot, 1);
    }

    #[test]
    fn corrupt_slot_reads_as_empty_without_touching_others() {
        let store = test_store();
        store.write_slot(0, &save("ok", 10)).unwrap();
        store.write_slot(1, &save("broken", 20)).unwrap();

        // Flip a byte in the middle of slot 1
        let path = store.slot_path(1);
        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        assert!(store.read_slot(1).is_none());
        assert!(store.read_slot(0).is_some());
    }

    #[test]
    fn wrong_version_reads_as_empty() {
        let store = test_store();
        let mut s = save("old-timer", 10);
        s.version = 99;
        store.write_slot(0, &s).unwrap();
        assert!(store.read_slot(0).is_none(), "version mismatch skips, never crashes");
    }

    #[test]
    fn delete_slot_is_idempotent() {
        let store = test_store();
        store.write_slot(0, &save("gone", 10)).unwrap();
        store.delete_slot(0).unwrap();
        assert!(store.read_slot(0).is_none());
        store.delete_slot(0).unwrap();
    }

    #[test]
    fn find_by_name_locates_the_slot() {
        let store = test_store();
        store.write_slot(3, &save("Vex", 10)).unwrap();
        assert_eq!(store.find_by_name("Vex"), Some(3));
        assert_eq!(store.find_by_name("Nobody"), None);
    }

    #[test]
    fn exhausted_character_deletion_leaves_other_slots() {
        let store = test_store();
        store.write_slot(0, &save("Dead", 10)).unwrap();
        store.write_slot(1, &save("Alive", 20)).unwrap();

        assert!(store.delete_by_name("Dead").unwrap());
        assert!(store.read_slot(0).is_none());
        assert!(store.read_slot(1).is_some());
        assert!(!store.delete_by_name("Dead").unwrap());
    }
}
