//! Configuração do cjr carregada a partir de `cjr.toml`.
//!
//! O arquivo é localizado pela variável de ambiente `CJR_DB_CONFIG` ou, na
//! ausência dela, como `cjr.toml` no diretório de trabalho. Valores não
//! presentes no arquivo usam defaults. A variável `CJR_DB` tem precedência
//! sobre o arquivo para o caminho do banco.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::StoreOptions;

/// Variável de ambiente que aponta o arquivo de configuração.
pub const CONFIG_ENV: &str = "CJR_DB_CONFIG";
/// Variável de ambiente que substitui o caminho do banco.
pub const DATABASE_ENV: &str = "CJR_DB";

/// Configuração de nível superior carregada de `cjr.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct CjrConfig {
    /// Caminho do arquivo SQLite.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Milissegundos de espera quando outro processo segura o lock do banco.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

// Valor padrão para o banco: `cjr.db` no diretório atual.
fn default_database() -> PathBuf {
    PathBuf::from("cjr.db")
}

// Valor padrão para a espera pelo lock: 5000ms.
fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for CjrConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl CjrConfig {
    /// Carrega a configuração a partir do ambiente e do diretório de trabalho.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let database = std::env::var(DATABASE_ENV).ok();
        Self::load_from(explicit.as_deref(), Path::new("cjr.toml"), database)
    }

    /// Resolve a configuração a partir do arquivo explícito (que precisa
    /// existir), senão de `fallback` se presente, senão dos defaults.
    /// `database`, quando não vazio, substitui o caminho do banco.
    fn load_from(
        explicit: Option<&Path>,
        fallback: &Path,
        database: Option<String>,
    ) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => {
                if !path.exists() {
                    bail!(
                        "configuration file '{}' named by {CONFIG_ENV} does not exist",
                        path.display()
                    );
                }
                Self::read(path)?
            }
            None if fallback.exists() => Self::read(fallback)?,
            None => Self::default(),
        };

        // Variável de ambiente tem precedência sobre o arquivo para o caminho do banco.
        if let Some(database) = database
            && !database.is_empty()
        {
            config.database = PathBuf::from(database);
        }

        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }
}
