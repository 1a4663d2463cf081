/// Process exit codes for both binaries. Variants are ordered so that a
/// numerically larger code always describes a problem discovered further
/// into the run (argument parsing fails before the cluster is ever touched,
/// and so on).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    ArgumentError = 1,
    NodeFileError = 2,
    DataFileError = 3,
    WorkingDirectoryError = 4,
    ClusterInitError = 5,
    SpawnError = 6,
    OutputDirectoryError = 7,
    AuxiliaryScriptError = 8,
    WrongTaskType = 9,
}

impl ExitCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.as_u8())
    }
}
