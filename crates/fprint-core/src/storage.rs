//! On-disk stored-print layout (§6). Encoding/decoding of the container
//! itself lives in [`crate::print`]; this module only knows the directory
//! layout and file permissions.

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::print::StoredPrint;

/// Both thumbs through both little fingers, enumerated 1–10 per §6's
/// on-disk path component. Left hand first, thumb to little finger, then
/// the same for the right hand — the conventional order this ecosystem's
/// enrollment UIs walk a user through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerCode {
    LeftThumb = 1,
    LeftIndex = 2,
    LeftMiddle = 3,
    LeftRing = 4,
    LeftLittle = 5,
    RightThumb = 6,
    RightIndex = 7,
    RightMiddle = 8,
    RightRing = 9,
    RightLittle = 10,
}

impl FingerCode {
    pub const ALL: [FingerCode; 10] = [
        FingerCode::LeftThumb,
        FingerCode::LeftIndex,
        FingerCode::LeftMiddle,
        FingerCode::LeftRing,
        FingerCode::LeftLittle,
        FingerCode::RightThumb,
        FingerCode::RightIndex,
        FingerCode::RightMiddle,
        FingerCode::RightRing,
        FingerCode::RightLittle,
    ];

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(code: u8) -> Result<Self> {
        FingerCode::ALL
            .into_iter()
            .find(|f| f.to_u8() == code)
            .ok_or_else(|| Error::invalid(format!("finger code {code} out of range 1..=10")))
    }
}

/// `$HOME/.fprint/prints/<driver_id_hex4>/<devtype_hex8>/<finger_code_hex1>`.
pub struct PrintStore {
    base: PathBuf,
}

impl PrintStore {
    /// Resolves the base directory via the platform home directory. Uses
    /// `dirs` rather than reading `$HOME` directly, per the ambient-stack
    /// configuration section of SPEC_FULL.md — the same crate `karana-os`
    /// already depends on elsewhere in the retrieval pack.
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::protocol("could not resolve home directory"))?;
        Ok(PrintStore::at(home.join(".fprint").join("prints")))
    }

    /// Rooted at an explicit base, for tests and for callers that don't want
    /// `$HOME`.
    pub fn at(base: PathBuf) -> Self {
        PrintStore { base }
    }

    fn dir_for(&self, driver_id: u16, devtype: u32) -> PathBuf {
        self.base
            .join(format!("{driver_id:04x}"))
            .join(format!("{devtype:08x}"))
    }

    fn path_for(&self, driver_id: u16, devtype: u32, finger: FingerCode) -> PathBuf {
        self.dir_for(driver_id, devtype).join(format!("{:x}", finger.to_u8()))
    }

    /// Writes `print` for `finger`, creating parent directories with
    /// user-private permissions (§6).
    pub fn save(&self, finger: FingerCode, print: &StoredPrint) -> Result<()> {
        let dir = self.dir_for(print.driver_id, print.devtype);
        create_private_dir_all(&dir).map_err(|e| Error::Io(e.to_string()))?;
        let path = self.path_for(print.driver_id, print.devtype, finger);
        let bytes = if print.items.len() == 1 {
            print.encode_fp1()
        } else {
            print.encode_fp2()
        };
        fs::write(&path, bytes).map_err(|e| Error::Io(e.to_string()))
    }

    /// Loads the print stored for `finger` under `driver_id`/`devtype`.
    /// `Error::NotFound` if nothing has been enrolled there (§6).
    pub fn load(&self, driver_id: u16, devtype: u32, finger: FingerCode) -> Result<StoredPrint> {
        let path = self.path_for(driver_id, devtype, finger);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::NotFound),
            Err(e) => return Err(Error::Io(e.to_string())),
        };
        StoredPrint::decode(&bytes)
    }

    pub fn delete(&self, driver_id: u16, devtype: u32, finger: FingerCode) -> Result<()> {
        let path = self.path_for(driver_id, devtype, finger);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound),
            Err(e) => Err(Error::Io(e.to_string())),
        }
    }

    /// Every finger code with a print already stored under `driver_id`/`devtype`.
    pub fn enrolled_fingers(&self, driver_id: u16, devtype: u32) -> Vec<FingerCode> {
        FingerCode::ALL
            .into_iter()
            .filter(|&f| self.path_for(driver_id, devtype, f).is_file())
            .collect()
    }
}

#[cfg(unix)]
fn create_private_dir_all(dir: &std::path::Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

#[cfg(not(unix))]
fn create_private_dir_all(dir: &std::path::Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::print::DataType;

    fn tmp_store() -> (tempfile::TempDir, PrintStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PrintStore::at(dir.path().to_path_buf());
        (dir, store)
    }

    #[test]
    fn missing_print_is_not_found() {
        let (_dir, store) = tmp_store();
        let err = store.load(0x08ff, 0x2580, FingerCode::LeftThumb).unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_dir, store) = tmp_store();
        let print = StoredPrint::new(0x08ff, 0x2580, DataType::Minutiae, vec![vec![1, 2, 3]]);
        store.save(FingerCode::LeftMiddle, &print).unwrap();
        let loaded = store.load(0x08ff, 0x2580, FingerCode::LeftMiddle).unwrap();
        assert_eq!(loaded, print);
    }

    #[test]
    fn out_of_range_finger_code_is_rejected() {
        let err = FingerCode::from_u8(0).unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
        let err = FingerCode::from_u8(11).unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn enrolled_fingers_lists_only_stored_ones() {
        let (_dir, store) = tmp_store();
        let print = StoredPrint::new(1, 1, DataType::Raw, vec![vec![0]]);
        store.save(FingerCode::LeftIndex, &print).unwrap();
        store.save(FingerCode::RightIndex, &print).unwrap();
        assert_eq!(
            store.enrolled_fingers(1, 1),
            vec![FingerCode::LeftIndex, FingerCode::RightIndex]
        );
    }

    #[test]
    fn delete_removes_and_then_reports_not_found() {
        let (_dir, store) = tmp_store();
        let print = StoredPrint::new(1, 1, DataType::Raw, vec![vec![0]]);
        store.save(FingerCode::LeftLittle, &print).unwrap();
        store.delete(1, 1, FingerCode::LeftLittle).unwrap();
        assert!(matches!(
            store.delete(1, 1, FingerCode::LeftLittle).unwrap_err(),
            Error::NotFound
        ));
    }
}
