/*!
 # Removable storage

 Debounced card-presence tracking and audio file selection. The monitor
 exclusively owns the storage driver and the one open file; playback only
 asks it to open, read and rewind.
*/

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, instrument, trace, warn};

use crate::hardware::PowerMode;
use crate::{Error, Result};

/// The presence signal must hold this long before the card is trusted
pub const DEBOUNCE_MS: u64 = 1000;

/// File extensions the decoder can play
pub const AUDIO_EXTENSIONS: [&str; 8] = ["mp3", "ogg", "wav", "flac", "aac", "m4a", "wma", "mid"];

/// One entry of the card's root directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
        }
    }
}

/// Removable storage driver: presence pin, volume, root directory and a
/// single open file
pub trait StorageDriver {
    fn card_detected(&self) -> bool;
    fn mount(&mut self) -> Result<()>;
    fn unmount(&mut self) {}
    fn open_root(&mut self) -> Result<()>;
    /// Next root directory entry, `None` past the end
    fn next_entry(&mut self) -> Option<DirEntry>;
    fn rewind_dir(&mut self);
    fn open(&mut self, name: &str) -> Result<()>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn seek(&mut self, pos: u64) -> Result<()>;
    fn close(&mut self);
}

/// Case-insensitive check against [`AUDIO_EXTENSIONS`]
pub fn is_audio_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            AUDIO_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DebounceMark {
    /// Millisecond timestamp of the first detection
    Since(u64),
    /// First detection happened during a suspend wake
    Wake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    Absent,
    Debouncing(DebounceMark),
    Present,
    /// Signal present but mounting failed; waits for the signal to drop
    Faulted,
}

/// Edge reported by [`StorageMonitor::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageEvent {
    /// Card confirmed and mounted
    Inserted,
    /// Card confirmed but could not be mounted
    Failed,
    /// A mounted card disappeared
    Removed,
}

/// Debounce state machine plus file selection
pub struct StorageMonitor {
    driver: Box<dyn StorageDriver>,
    presence: Presence,
    open_file: Option<String>,
    /// Last selected file; "next" skips it
    remembered: String,
}

impl std::fmt::Debug for StorageMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageMonitor")
            .field("presence", &self.presence)
            .field("open_file", &self.open_file)
            .field("remembered", &self.remembered)
            .finish()
    }
}

impl StorageMonitor {
    pub fn new(driver: Box<dyn StorageDriver>) -> Self {
        Self {
            driver,
            presence: Presence::Absent,
            open_file: None,
            remembered: String::new(),
        }
    }

    pub fn is_present(&self) -> bool {
        self.presence == Presence::Present
    }

    pub fn is_file_open(&self) -> bool {
        self.open_file.is_some()
    }

    pub fn current_file(&self) -> Option<&str> {
        self.open_file.as_deref()
    }

    /// Sets the name "next" should skip without opening it
    pub fn remember(&mut self, name: &str) {
        self.remembered = name.to_string();
    }

    /// Samples the presence signal once. In [`PowerMode::Suspend`] there is no
    /// millisecond clock, so one wake period stands in for the debounce time.
    pub fn poll(&mut self, power: PowerMode, now_ms: u64) -> Option<StorageEvent> {
        let detected = self.driver.card_detected();
        match (self.presence, detected) {
            (Presence::Absent, true) => {
                let mark = if power.has_millis() {
                    DebounceMark::Since(now_ms)
                } else {
                    DebounceMark::Wake
                };
                debug!("Card signal detected, debouncing ({:?})", mark);
                self.presence = Presence::Debouncing(mark);
                None
            }
            (Presence::Debouncing(mark), true) => {
                if !power.has_millis() {
                    return Some(self.initialize());
                }
                match mark {
                    DebounceMark::Since(since) if now_ms.saturating_sub(since) >= DEBOUNCE_MS => {
                        Some(self.initialize())
                    }
                    DebounceMark::Since(_) => None,
                    DebounceMark::Wake => {
                        // woke up from suspend before trusting the signal
                        self.presence = Presence::Debouncing(DebounceMark::Since(now_ms));
                        None
                    }
                }
            }
            (Presence::Present, true) | (Presence::Faulted, true) | (Presence::Absent, false) => {
                None
            }
            (Presence::Debouncing(_), false) => {
                trace!("Card signal dropped while debouncing");
                self.presence = Presence::Absent;
                None
            }
            (Presence::Faulted, false) => {
                self.presence = Presence::Absent;
                None
            }
            (Presence::Present, false) => {
                warn!("Storage card removed");
                self.close_file();
                self.driver.unmount();
                self.presence = Presence::Absent;
                Some(StorageEvent::Removed)
            }
        }
    }

    fn initialize(&mut self) -> StorageEvent {
        let result = self.driver.mount().and_then(|_| self.driver.open_root());
        match result {
            Ok(()) => {
                info!("Storage card ready");
                self.presence = Presence::Present;
                StorageEvent::Inserted
            }
            Err(e) => {
                error!("Storage card initialization failed: {}", e);
                self.presence = Presence::Faulted;
                StorageEvent::Failed
            }
        }
    }

    /// Opens a file by name, bypassing the extension filter
    #[instrument(skip(self))]
    pub fn open_file(&mut self, name: &str) -> bool {
        self.close_file();
        if !self.is_present() {
            debug!("No card, cannot open {}", name);
            return false;
        }
        match self.driver.open(name) {
            Ok(()) => {
                info!("Opened {}", name);
                self.open_file = Some(name.to_string());
                self.remembered = name.to_string();
                true
            }
            Err(e) => {
                warn!("Failed to open {}: {}", name, e);
                false
            }
        }
    }

    /// Opens the next audio file in the root directory, skipping the
    /// remembered one and wrapping once past the end. When the remembered
    /// file is the only candidate it is reopened.
    #[instrument(skip(self))]
    pub fn open_next_file(&mut self) -> bool {
        self.close_file();
        if !self.is_present() {
            debug!("No card, no next file");
            return false;
        }

        let mut wrapped = false;
        let mut skipped_remembered = false;
        loop {
            let Some(entry) = self.driver.next_entry() else {
                if wrapped {
                    break;
                }
                self.driver.rewind_dir();
                wrapped = true;
                continue;
            };
            if entry.is_dir || !is_audio_file(&entry.name) {
                trace!("Skipping {}", entry.name);
                continue;
            }
            if entry.name == self.remembered {
                skipped_remembered = true;
                continue;
            }
            return self.open_file(&entry.name);
        }

        if skipped_remembered {
            let name = self.remembered.clone();
            return self.open_file(&name);
        }
        warn!("No audio files on card");
        false
    }

    pub fn close_file(&mut self) {
        if let Some(name) = self.open_file.take() {
            trace!("Closing {}", name);
            self.driver.close();
        }
    }

    /// Reads the next chunk of the open file. `None` means the read failed.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Option<usize> {
        if self.open_file.is_none() {
            return Some(0);
        }
        match self.driver.read(buf) {
            Ok(n) => Some(n),
            Err(e) => {
                error!("Read failed: {}", e);
                None
            }
        }
    }

    /// Seeks the open file back to the start
    pub fn rewind(&mut self) -> bool {
        if self.open_file.is_none() {
            return false;
        }
        match self.driver.seek(0) {
            Ok(()) => true,
            Err(e) => {
                error!("Seek failed: {}", e);
                false
            }
        }
    }
}

/// Host directory standing in for the card; present while the directory exists
#[derive(Debug)]
pub struct DirStorage {
    root: PathBuf,
    mounted: bool,
    entries: Vec<DirEntry>,
    cursor: usize,
    file: Option<File>,
}

impl DirStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            mounted: false,
            entries: Vec::new(),
            cursor: 0,
            file: None,
        }
    }
}

impl StorageDriver for DirStorage {
    fn card_detected(&self) -> bool {
        self.root.is_dir()
    }

    fn mount(&mut self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(Error::NoCardPresent);
        }
        self.mounted = true;
        Ok(())
    }

    fn unmount(&mut self) {
        self.mounted = false;
        self.entries.clear();
        self.file = None;
    }

    fn open_root(&mut self) -> Result<()> {
        if !self.mounted {
            return Err(Error::Storage("volume not mounted".into()));
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Root of {} has {} entries", self.root.display(), entries.len());
        self.entries = entries;
        self.cursor = 0;
        Ok(())
    }

    fn next_entry(&mut self) -> Option<DirEntry> {
        let entry = self.entries.get(self.cursor).cloned();
        if entry.is_some() {
            self.cursor += 1;
        }
        entry
    }

    fn rewind_dir(&mut self) {
        self.cursor = 0;
    }

    fn open(&mut self, name: &str) -> Result<()> {
        if !self.mounted {
            return Err(Error::NoCardPresent);
        }
        if name.contains(|c| c == '/' || c == '\\') {
            return Err(Error::FileNotFound(name.to_string()));
        }
        match File::open(self.root.join(name)) {
            Ok(file) if file.metadata().is_ok_and(|m| m.is_file()) => {
                self.file = Some(file);
                Ok(())
            }
            Ok(_) => Err(Error::FileNotFound(name.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::FileNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.file.as_mut() {
            Some(file) => Ok(file.read(buf)?),
            None => Ok(0),
        }
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.seek(SeekFrom::Start(pos))?;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.file = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeStorage;

    fn present_monitor(storage: &FakeStorage) -> StorageMonitor {
        let mut monitor = StorageMonitor::new(Box::new(storage.clone()));
        storage.set_detected(true);
        monitor.poll(PowerMode::Normal, 0);
        assert_eq!(
            monitor.poll(PowerMode::Normal, DEBOUNCE_MS),
            Some(StorageEvent::Inserted)
        );
        monitor
    }

    #[test]
    fn audio_extension_filter() {
        assert!(is_audio_file("alarm.MP3"));
        assert!(is_audio_file("birds.ogg"));
        assert!(!is_audio_file("notes.txt"));
        assert!(!is_audio_file("mp3"));
    }

    #[test]
    fn debounce_needs_one_second() {
        let storage = FakeStorage::default();
        let mut monitor = StorageMonitor::new(Box::new(storage.clone()));
        storage.set_detected(true);
        assert_eq!(monitor.poll(PowerMode::Normal, 100), None);
        assert_eq!(monitor.poll(PowerMode::LowPower, 1099), None);
        assert!(!monitor.is_present());
        assert_eq!(
            monitor.poll(PowerMode::Normal, 1100),
            Some(StorageEvent::Inserted)
        );
        assert!(monitor.is_present());
        // no re-initialization while present
        assert_eq!(monitor.poll(PowerMode::Normal, 5000), None);
        assert_eq!(storage.state().mounts, 1);
    }

    #[test]
    fn bouncing_signal_restarts_debounce() {
        let storage = FakeStorage::default();
        let mut monitor = StorageMonitor::new(Box::new(storage.clone()));
        storage.set_detected(true);
        monitor.poll(PowerMode::Normal, 0);
        storage.set_detected(false);
        monitor.poll(PowerMode::Normal, 500);
        storage.set_detected(true);
        monitor.poll(PowerMode::Normal, 900);
        assert_eq!(monitor.poll(PowerMode::Normal, 1500), None);
        assert_eq!(
            monitor.poll(PowerMode::Normal, 1900),
            Some(StorageEvent::Inserted)
        );
    }

    #[test]
    fn suspend_trusts_signal_on_following_wake() {
        let storage = FakeStorage::default();
        let mut monitor = StorageMonitor::new(Box::new(storage.clone()));
        storage.set_detected(true);
        assert_eq!(monitor.poll(PowerMode::Suspend, 0), None);
        assert_eq!(
            monitor.poll(PowerMode::Suspend, 0),
            Some(StorageEvent::Inserted)
        );
    }

    #[test]
    fn mount_failure_waits_for_next_edge() {
        let storage = FakeStorage::default();
        storage.state_mut().mount_fails = true;
        let mut monitor = StorageMonitor::new(Box::new(storage.clone()));
        storage.set_detected(true);
        monitor.poll(PowerMode::Normal, 0);
        assert_eq!(
            monitor.poll(PowerMode::Normal, 1000),
            Some(StorageEvent::Failed)
        );
        storage.state_mut().mount_fails = false;
        assert_eq!(monitor.poll(PowerMode::Normal, 5000), None);
        assert!(!monitor.is_present());
        assert_eq!(storage.state().mounts, 1);

        storage.set_detected(false);
        monitor.poll(PowerMode::Normal, 6000);
        storage.set_detected(true);
        monitor.poll(PowerMode::Normal, 7000);
        assert_eq!(
            monitor.poll(PowerMode::Normal, 8000),
            Some(StorageEvent::Inserted)
        );
    }

    #[test]
    fn removal_closes_file() {
        let storage = FakeStorage::with_files(&[("a.mp3", "abc")]);
        let mut monitor = present_monitor(&storage);
        assert!(monitor.open_file("a.mp3"));
        storage.set_detected(false);
        assert_eq!(
            monitor.poll(PowerMode::Normal, 9000),
            Some(StorageEvent::Removed)
        );
        assert!(!monitor.is_file_open());
        assert!(!storage.state().file_open);
    }

    #[test]
    fn next_skips_non_audio_and_previous() {
        let storage = FakeStorage::with_files(&[
            ("a.mp3", "aaaa"),
            ("readme.txt", "text"),
            ("b.mp3", "bbbb"),
        ]);
        storage.state_mut().entries.insert(1, DirEntry::dir("music.mp3"));
        let mut monitor = present_monitor(&storage);

        assert!(monitor.open_file("a.mp3"));
        assert!(monitor.open_next_file());
        assert_eq!(monitor.current_file(), Some("b.mp3"));
        assert!(monitor.open_next_file());
        assert_eq!(monitor.current_file(), Some("a.mp3"));
        assert!(monitor.open_next_file());
        assert_eq!(monitor.current_file(), Some("b.mp3"));
    }

    #[test]
    fn next_reopens_single_candidate() {
        let storage = FakeStorage::with_files(&[("only.wav", "x"), ("x.txt", "y")]);
        let mut monitor = present_monitor(&storage);
        assert!(monitor.open_next_file());
        assert!(monitor.open_next_file());
        assert_eq!(monitor.current_file(), Some("only.wav"));
    }

    #[test]
    fn next_without_audio_fails() {
        let storage = FakeStorage::with_files(&[("x.txt", "y")]);
        let mut monitor = present_monitor(&storage);
        assert!(!monitor.open_next_file());
        assert!(!monitor.is_file_open());
    }

    #[test]
    fn open_by_name_bypasses_filter() {
        let storage = FakeStorage::with_files(&[("notes.txt", "y")]);
        let mut monitor = present_monitor(&storage);
        assert!(monitor.open_file("notes.txt"));
        assert!(!monitor.open_file("missing.mp3"));
        assert!(!monitor.is_file_open());
    }

    #[test]
    fn nothing_opens_without_card() {
        let storage = FakeStorage::with_files(&[("a.mp3", "a")]);
        let mut monitor = StorageMonitor::new(Box::new(storage.clone()));
        assert!(!monitor.open_file("a.mp3"));
        assert!(!monitor.open_next_file());
    }

    #[test]
    fn dir_storage_reads_host_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.mp3"), b"0123456789").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let mut monitor = StorageMonitor::new(Box::new(DirStorage::new(dir.path())));
        monitor.poll(PowerMode::Normal, 0);
        monitor.poll(PowerMode::Normal, DEBOUNCE_MS);
        assert!(monitor.is_present());

        assert!(monitor.open_next_file());
        assert_eq!(monitor.current_file(), Some("b.mp3"));
        let mut buf = [0u8; 8];
        assert_eq!(monitor.read_chunk(&mut buf), Some(8));
        assert_eq!(monitor.read_chunk(&mut buf), Some(2));
        assert_eq!(monitor.read_chunk(&mut buf), Some(0));
        assert!(monitor.rewind());
        assert_eq!(monitor.read_chunk(&mut buf), Some(8));
        assert_eq!(&buf, b"01234567");
        assert!(!monitor.open_file("../escape.mp3"));
        assert!(!monitor.open_file("sub"));
        assert!(!monitor.is_file_open());
    }
}
