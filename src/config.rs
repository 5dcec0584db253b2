//! Service configuration shared by the server and indexer processes.

use std::path::PathBuf;

use clap::Parser;

/// Command line arguments common to the `server` and `indexer` sub commands.
#[derive(Parser, Debug, Clone)]
pub struct ConfigArgs {
    /// Connection URI or path of the catalog database.
    #[arg(long, default_value = "htsget.sqlite")]
    pub db_path: String,
    /// Approximate cap on records per htsget body slice.
    #[arg(long, default_value_t = 10_000_000)]
    pub chunk_size: i64,
    /// Width of a position bucket in base pairs.
    #[arg(long, default_value_t = 1_000_000)]
    pub bucket_size: i64,
    /// IP to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    pub listen_host: String,
    /// Port to listen on.
    #[arg(long, default_value_t = 3000)]
    pub listen_port: u16,
    /// External base URL of this service, defaults to `http://localhost:{port}`.
    #[arg(long)]
    pub htsget_url: Option<String>,
    /// Directory holding the indexing queue.
    #[arg(long, default_value = "/tmp/htsget-indexing")]
    pub indexing_path: String,
    /// Shared-secret bearer token that bypasses authorization (testing only),
    /// defaults to the `HTSGET_TEST_KEY` environment variable.
    #[arg(long)]
    pub test_key: Option<String>,
    /// Base URL of the OPA policy decision point; authorization is disabled
    /// when unset.
    #[arg(long)]
    pub opa_url: Option<String>,
    /// Bearer secret for the policy decision point.
    #[arg(long)]
    pub opa_secret: Option<String>,
    /// Key of the site-admin document on the policy decision point.
    #[arg(long, default_value = "site_admin")]
    pub site_admin_key: String,
    /// Enable verbose request logging.
    #[arg(long)]
    pub debug: bool,
}

/// Resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub chunk_size: i64,
    pub bucket_size: i64,
    pub listen_host: String,
    pub listen_port: u16,
    pub htsget_url: String,
    pub indexing_path: PathBuf,
    pub test_key: String,
    pub opa_url: Option<String>,
    pub opa_secret: String,
    pub site_admin_key: String,
    pub debug: bool,
}

impl ConfigArgs {
    /// Resolve command line arguments and environment into a `Config`.
    pub fn to_config(&self) -> Config {
        let htsget_url = self
            .htsget_url
            .clone()
            .or_else(|| std::env::var("HTSGET_URL").ok())
            .unwrap_or_else(|| format!("http://localhost:{}", self.listen_port));
        let test_key = self
            .test_key
            .clone()
            .or_else(|| std::env::var("HTSGET_TEST_KEY").ok())
            .unwrap_or_else(|| "testtesttest".to_string());
        Config {
            db_path: self.db_path.clone(),
            chunk_size: self.chunk_size,
            bucket_size: self.bucket_size,
            listen_host: self.listen_host.clone(),
            listen_port: self.listen_port,
            htsget_url,
            indexing_path: PathBuf::from(&self.indexing_path),
            test_key,
            opa_url: self.opa_url.clone(),
            opa_secret: self.opa_secret.clone().unwrap_or_default(),
            site_admin_key: self.site_admin_key.clone(),
            debug: self.debug,
        }
    }
}

#[cfg(test)]
mod test {
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        config: super::ConfigArgs,
    }

    #[test]
    fn defaults() {
        let cli = TestCli::parse_from(["test"]);
        let config = cli.config.to_config();

        assert_eq!(config.chunk_size, 10_000_000);
        assert_eq!(config.bucket_size, 1_000_000);
        assert_eq!(config.listen_port, 3000);
        assert_eq!(config.htsget_url, "http://localhost:3000");
    }

    #[test]
    fn overrides() {
        let cli = TestCli::parse_from([
            "test",
            "--db-path",
            "/data/htsget.sqlite",
            "--bucket-size",
            "10",
            "--htsget-url",
            "https://htsget.example.org",
        ]);
        let config = cli.config.to_config();

        assert_eq!(config.db_path, "/data/htsget.sqlite");
        assert_eq!(config.bucket_size, 10);
        assert_eq!(config.htsget_url, "https://htsget.example.org");
    }
}
