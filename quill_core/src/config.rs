use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

static DATA_DIR_NAME: &str = "quill";
static QUILL_DB_NAME: &str = "quill_db.sqlite";
static CONFIG_FILE_NAME: &str = "config.json";

// For now this directory structure should be like
// data_dir_path
// |- quill
//    |- quill_db.sqlite
//    |- config.json

fn default_posts_per_page() -> u64 {
    10
}

fn default_home_cache_ttl_secs() -> u64 {
    20
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct QuillConfig {
    pub(crate) database_path: PathBuf,

    /// Fixed page size used by every feed listing.
    ///
    /// `serde(default)` keeps backward compatibility with old config.json files.
    #[serde(default = "default_posts_per_page")]
    pub posts_per_page: u64,

    /// How long a rendered home-feed snapshot stays valid.
    #[serde(default = "default_home_cache_ttl_secs")]
    pub home_cache_ttl_secs: u64,
}

impl QuillConfig {
    /// Creates a new QuillConfig with defaults rooted at the specified data directory
    fn new(data_dir: PathBuf) -> Self {
        QuillConfig {
            database_path: data_dir.join(QUILL_DB_NAME),
            posts_per_page: default_posts_per_page(),
            home_cache_ttl_secs: default_home_cache_ttl_secs(),
        }
    }
}

/// Gets the existing config or initializes a new one if it doesn't exist
pub async fn get_or_init() -> Result<QuillConfig, Box<dyn std::error::Error>> {
    let data_dir = dirs::data_dir().expect("failed to find a data directory on this platform");

    let quill_dir = data_dir.join(DATA_DIR_NAME);
    let config_path = quill_dir.join(CONFIG_FILE_NAME);

    // Create the quill directory if it doesn't exist
    fs::create_dir_all(&quill_dir).await?;

    // Check if config file exists
    if config_path.exists() {
        // Read and deserialize existing config
        let mut file = fs::File::open(&config_path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;

        let config: QuillConfig = serde_json::from_str(&contents)?;
        Ok(config)
    } else {
        // Create new config
        let config = QuillConfig::new(quill_dir.clone());

        // Serialize and write to file
        let json = serde_json::to_string_pretty(&config)?;
        let mut file = fs::File::create(&config_path).await?;
        file.write_all(json.as_bytes()).await?;

        Ok(config)
    }
}
