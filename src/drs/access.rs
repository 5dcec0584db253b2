//! Access-id parsing and access-URL resolution.
//!
//! An access id has the bit-exact syntax
//! `endpoint/bucket/object_name[?access=K&secret=K[&public=true]]`; `file://`
//! access URLs resolve to local absolute paths instead.

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

use crate::common::s3::{self, ObjectMetadata};
use crate::err::OpError;

fn access_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"((https?://)*.+?)/(.+?)/(.+?)(\?(.+))*$").expect("invalid access-id regex")
    })
}

/// A parsed S3-style access id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedAccessId {
    pub endpoint: String,
    pub bucket: String,
    pub object_name: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub public: bool,
}

impl ParsedAccessId {
    /// Parse the access-id grammar; the regex is a bijection on valid input.
    pub fn parse(access_id: &str) -> Result<Self, OpError> {
        let captures = access_id_re()
            .captures(access_id)
            .ok_or_else(|| OpError::BadRequest(format!("invalid access_id: {}", access_id)))?;
        let mut parsed = ParsedAccessId {
            endpoint: captures
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            bucket: captures
                .get(3)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            object_name: captures
                .get(4)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            ..Default::default()
        };
        if let Some(query) = captures.get(6) {
            for pair in query.as_str().split('&') {
                match pair.split_once('=') {
                    Some(("access", value)) => parsed.access_key = Some(value.to_string()),
                    Some(("secret", value)) => parsed.secret_key = Some(value.to_string()),
                    Some(("public", value)) => {
                        parsed.public = value.eq_ignore_ascii_case("true");
                    }
                    _ => {
                        return Err(OpError::BadRequest(format!(
                            "invalid access_id query parameter: {}",
                            pair
                        )))
                    }
                }
            }
        }
        // The object name keeps the query string out of it; strip any residue
        // left when the regex matched greedily.
        if let Some((object_name, _)) = parsed.object_name.split_once('?') {
            parsed.object_name = object_name.to_string();
        }
        Ok(parsed)
    }

    /// Re-serialize the `endpoint/bucket/object` triple.
    pub fn to_plain_id(&self) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, self.object_name)
    }
}

/// Result of resolving an access id or access URL.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ResolvedAccessUrl {
    pub url: String,
    pub metadata: ObjectMetadata,
}

/// Resolve an access id into a (presigned) URL plus object metadata.
pub async fn resolve_access_id(access_id: &str) -> Result<ResolvedAccessUrl, OpError> {
    let parsed = ParsedAccessId::parse(access_id)?;
    let (url, metadata) = s3::get_s3_url(
        &parsed.endpoint,
        &parsed.bucket,
        &parsed.object_name,
        parsed.access_key.as_deref(),
        parsed.secret_key.as_deref(),
        None,
        parsed.public,
    )
    .await
    .map_err(|e| OpError::Upstream {
        status: 500,
        message: format!("could not resolve access_id {}: {}", access_id, e),
    })?;
    Ok(ResolvedAccessUrl { url, metadata })
}

/// Turn a `file://` access URL into a local path.  Only empty and
/// `localhost` hosts are accepted.
pub fn local_path_from_file_url(file_url: &str) -> Result<PathBuf, OpError> {
    let url = url::Url::parse(file_url)
        .map_err(|e| OpError::BadRequest(format!("invalid file url {}: {}", file_url, e)))?;
    if url.scheme() != "file" {
        return Err(OpError::BadRequest(format!(
            "not a file url: {}",
            file_url
        )));
    }
    match url.host_str() {
        None | Some("") | Some("localhost") => {}
        Some(host) => {
            return Err(OpError::BadRequest(format!(
                "unsupported file url host {}: {}",
                host, file_url
            )))
        }
    }
    Ok(PathBuf::from(url.path()))
}

/// Where the bytes behind an access method can be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedAccess {
    Local(PathBuf),
    S3(ParsedAccessId),
}

impl ResolvedAccess {
    /// Classify an access method without touching the network.
    pub fn from_access_method(
        method: &crate::catalog::drs::AccessMethod,
    ) -> Result<Self, OpError> {
        if let Some(access_url) = &method.access_url {
            return local_path_from_file_url(&access_url.url).map(ResolvedAccess::Local);
        }
        if let Some(access_id) = &method.access_id {
            return ParsedAccessId::parse(access_id).map(ResolvedAccess::S3);
        }
        Err(OpError::BadRequest(
            "access method has neither access_id nor access_url".to_string(),
        ))
    }

    /// Produce a local path for the object, staging S3 objects into the
    /// given cache directory on first use.
    pub async fn stage_to_local(&self, cache_dir: &std::path::Path) -> Result<PathBuf, OpError> {
        match self {
            ResolvedAccess::Local(path) => Ok(path.clone()),
            ResolvedAccess::S3(parsed) => {
                let dest = cache_dir
                    .join(&parsed.bucket)
                    .join(&parsed.object_name);
                if !dest.exists() {
                    s3::download_object(
                        &parsed.endpoint,
                        &parsed.bucket,
                        &parsed.object_name,
                        parsed.access_key.as_deref(),
                        parsed.secret_key.as_deref(),
                        None,
                        &dest,
                    )
                    .await
                    .map_err(|e| OpError::Upstream {
                        status: 500,
                        message: format!(
                            "could not stage s3://{}/{}: {}",
                            parsed.bucket, parsed.object_name, e
                        ),
                    })?;
                }
                Ok(dest)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{local_path_from_file_url, ParsedAccessId};

    #[test]
    fn parse_plain_access_id() {
        let parsed = ParsedAccessId::parse("http://minio:9000/mybucket/NA18537.vcf.gz").unwrap();
        assert_eq!(parsed.endpoint, "http://minio:9000");
        assert_eq!(parsed.bucket, "mybucket");
        assert_eq!(parsed.object_name, "NA18537.vcf.gz");
        assert_eq!(parsed.access_key, None);
        assert!(!parsed.public);
    }

    #[test]
    fn parse_access_id_with_credentials() {
        let parsed = ParsedAccessId::parse(
            "minio.example.org/bucket/dir/NA18537.vcf.gz?access=AKIA&secret=hunter2",
        )
        .unwrap();
        assert_eq!(parsed.endpoint, "minio.example.org");
        assert_eq!(parsed.bucket, "bucket");
        assert_eq!(parsed.object_name, "dir/NA18537.vcf.gz");
        assert_eq!(parsed.access_key.as_deref(), Some("AKIA"));
        assert_eq!(parsed.secret_key.as_deref(), Some("hunter2"));
        assert!(!parsed.public);
    }

    #[test]
    fn parse_public_access_id() {
        let parsed =
            ParsedAccessId::parse("https://s3.amazonaws.com/1000genomes/file.bam?public=true")
                .unwrap();
        assert_eq!(parsed.endpoint, "https://s3.amazonaws.com");
        assert!(parsed.public);
    }

    #[test]
    fn roundtrip_is_bijective() {
        let id = "http://minio:9000/mybucket/dir/sub/NA18537.vcf.gz";
        let parsed = ParsedAccessId::parse(id).unwrap();
        assert_eq!(parsed.to_plain_id(), id);
        let reparsed = ParsedAccessId::parse(&parsed.to_plain_id()).unwrap();
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn reject_garbage() {
        assert!(ParsedAccessId::parse("no-slashes-here").is_err());
        assert!(
            ParsedAccessId::parse("endpoint/bucket/obj?mystery=parameter").is_err()
        );
    }

    #[rstest::rstest]
    #[case("file:///data/files/NA18537.vcf.gz", "/data/files/NA18537.vcf.gz")]
    #[case("file://localhost/data/NA18537.vcf.gz", "/data/NA18537.vcf.gz")]
    fn file_urls(#[case] url: &str, #[case] expected: &str) {
        let path = local_path_from_file_url(url).unwrap();
        assert_eq!(path, std::path::PathBuf::from(expected));
    }

    #[test]
    fn reject_remote_file_url() {
        assert!(local_path_from_file_url("file://fileserver/data/x.vcf").is_err());
        assert!(local_path_from_file_url("http://example.org/x.vcf").is_err());
    }
}
