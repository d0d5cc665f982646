use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_USERNAME: &str = "dbadmin";
pub const DEFAULT_PASSWORD: &str = "password";
pub const DEFAULT_DB_NAME: &str = "gas";
pub const DEFAULT_DB_PASSWORD: &str = "gaspwd";
pub const DEFAULT_CLIENT: &str = "vsql";
pub const DEFAULT_REMOTE_DIR: &str = "/tmp/oil_data";

// relative to the directory holding our executable
pub const DEFAULT_DATA_DIR: &str = "assets/oil_data";

// How long we give the server to ask for, and accept, the password
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(5);

// Bulk loads are slow
pub const PROMPT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// Schema has to go first, the data files insert into its tables.
const DEFAULT_FILES: [&str; 7] = [
    "schema.sql",
    "sample_data/data_crude_oil_and_petroleum.sql",
    "sample_data/data_crude_oil_future_contract.sql",
    "sample_data/data_total_gasoline.sql",
    "sample_data/data_total_gasoline_by_prime_supplier.sql",
    "sample_data/data_us_field_production_of_curde_oil.sql",
    "sample_data/data_us_regular_conventional_gasoline_price.sql",
];

/// The machine we load into, and the credentials for both the OS account and the database.
#[derive(Clone)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub db_name: String,
    pub db_password: String,
}

impl Target {
    pub fn new(host: &str) -> Target {
        Target {
            host: host.to_string(),
            port: DEFAULT_PORT,
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            db_name: DEFAULT_DB_NAME.to_string(),
            db_password: DEFAULT_DB_PASSWORD.to_string(),
        }
    }
}

// Never print the passwords
impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("db_name", &self.db_name)
            .field("db_password", &"***")
            .finish()
    }
}

/// Ordered list of SQL files, relative to the data directory.
/// Loaded strictly in this order.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSet(Vec<String>);

impl FileSet {
    pub fn new<I, S>(files: I) -> FileSet
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FileSet(files.into_iter().map(Into::into).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Default for FileSet {
    fn default() -> Self {
        FileSet::new(DEFAULT_FILES)
    }
}

/// Everything one run needs. Built once in main, then only read.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub target: Target,
    pub local_dir: PathBuf,
    pub remote_dir: String,
    pub files: FileSet,
    /// Batch SQL runner on the remote machine
    pub client: String,
    pub auth_timeout: Duration,
    pub prompt_timeout: Duration,
}

impl LoadConfig {
    pub fn new(target: Target, local_dir: PathBuf) -> LoadConfig {
        LoadConfig {
            target,
            local_dir,
            remote_dir: DEFAULT_REMOTE_DIR.to_string(),
            files: FileSet::default(),
            client: DEFAULT_CLIENT.to_string(),
            auth_timeout: AUTH_TIMEOUT,
            prompt_timeout: PROMPT_TIMEOUT,
        }
    }

    /// Full remote path of a file from the file set
    pub fn remote_path(&self, file: &str) -> String {
        format!("{}/{file}", self.remote_dir.trim_end_matches('/'))
    }
}

/// `assets/oil_data` next to the running binary
pub fn default_data_dir() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let mut dir = exe
        .parent()
        .map(|p| p.to_path_buf())
        .ok_or_else(|| anyhow::anyhow!("executable {} has no parent dir", exe.display()))?;
    dir.push(DEFAULT_DATA_DIR);
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_file_set_starts_with_schema() {
        let files = FileSet::default();
        assert_eq!(files.len(), 7);
        assert_eq!(files.iter().next(), Some("schema.sql"));
        assert!(files.iter().skip(1).all(|f| f.starts_with("sample_data/")));
    }

    #[test]
    fn remote_path_joins_once() {
        let mut cfg = LoadConfig::new(Target::new("10.0.0.5"), PathBuf::from("/data"));
        assert_eq!(cfg.remote_path("schema.sql"), "/tmp/oil_data/schema.sql");
        cfg.remote_dir = "/srv/load/".to_string();
        assert_eq!(cfg.remote_path("a/b.sql"), "/srv/load/a/b.sql");
    }

    #[test]
    fn debug_hides_passwords() {
        let out = format!("{:?}", Target::new("10.0.0.5"));
        assert!(out.contains("10.0.0.5"));
        assert!(out.contains(r#"password: "***""#));
        assert!(!out.contains(DEFAULT_DB_PASSWORD));
    }
}
