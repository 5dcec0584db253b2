//! Helper code for working with S3-compatible object stores.

use std::time::Duration;

use aws_sdk_s3::presigning::PresigningConfig;

/// Lifetime of presigned GET URLs handed out to htsget/DRS clients.
const PRESIGN_EXPIRY_SECS: u64 = 3600;

/// Metadata reported alongside a resolved access URL.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub etag: String,
    pub size: i64,
}

/// Build an S3 client for the given endpoint.
///
/// When `access_key`/`secret_key` are given they are used as static
/// credentials; otherwise the ambient AWS environment configuration applies
/// (the deployment's credential issuer exports these for the worker).
pub async fn get_client(
    endpoint: &str,
    access_key: Option<&str>,
    secret_key: Option<&str>,
    region: Option<&str>,
) -> Result<aws_sdk_s3::Client, anyhow::Error> {
    let endpoint_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    };
    let config = aws_config::from_env().load().await;
    let mut builder = aws_sdk_s3::config::Builder::from(&config)
        .endpoint_url(&endpoint_url)
        .force_path_style(true)
        .region(aws_sdk_s3::config::Region::new(
            region.unwrap_or("us-east-1").to_string(),
        ));
    if let (Some(access_key), Some(secret_key)) = (access_key, secret_key) {
        builder = builder.credentials_provider(aws_sdk_s3::config::Credentials::new(
            access_key, secret_key, None, None, "htsget-server",
        ));
    }
    Ok(aws_sdk_s3::Client::from_conf(builder.build()))
}

/// Return a presigned GET URL and object metadata for `bucket`/`object_id`.
///
/// With `public` set, no signing is performed and the plain path-style URL is
/// returned instead.
#[allow(clippy::too_many_arguments)]
pub async fn get_s3_url(
    endpoint: &str,
    bucket: &str,
    object_id: &str,
    access_key: Option<&str>,
    secret_key: Option<&str>,
    region: Option<&str>,
    public: bool,
) -> Result<(String, ObjectMetadata), anyhow::Error> {
    let client = get_client(endpoint, access_key, secret_key, region).await?;

    let head = client
        .head_object()
        .bucket(bucket)
        .key(object_id)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("could not stat s3://{}/{}: {}", bucket, object_id, e))?;
    let metadata = ObjectMetadata {
        etag: head.e_tag().unwrap_or_default().trim_matches('"').to_string(),
        size: head.content_length().unwrap_or_default(),
    };

    if public {
        let base = endpoint.trim_end_matches('/');
        let url = if base.starts_with("http://") || base.starts_with("https://") {
            format!("{}/{}/{}", base, bucket, object_id)
        } else {
            format!("https://{}/{}/{}", base, bucket, object_id)
        };
        return Ok((url, metadata));
    }

    let presigned = client
        .get_object()
        .bucket(bucket)
        .key(object_id)
        .presigned(
            PresigningConfig::expires_in(Duration::from_secs(PRESIGN_EXPIRY_SECS))
                .map_err(|e| anyhow::anyhow!("invalid presigning configuration: {}", e))?,
        )
        .await
        .map_err(|e| anyhow::anyhow!("could not presign s3://{}/{}: {}", bucket, object_id, e))?;
    Ok((presigned.uri().to_string(), metadata))
}

/// Download `bucket`/`object_id` to the local path `dst`.
///
/// The genomic-file readers only operate on local files, so S3-held objects
/// are staged to disk before opening.
pub async fn download_object(
    endpoint: &str,
    bucket: &str,
    object_id: &str,
    access_key: Option<&str>,
    secret_key: Option<&str>,
    region: Option<&str>,
    dst: &std::path::Path,
) -> Result<(), anyhow::Error> {
    let client = get_client(endpoint, access_key, secret_key, region).await?;

    tracing::debug!(
        "downloading s3://{}/{} to {:?}",
        &bucket,
        &object_id,
        &dst
    );
    let mut object = client
        .get_object()
        .bucket(bucket)
        .key(object_id)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("could not fetch s3://{}/{}: {}", bucket, object_id, e))?;

    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(dst).await?;
    while let Some(bytes) = object
        .body
        .try_next()
        .await
        .map_err(|e| anyhow::anyhow!("problem streaming s3://{}/{}: {}", bucket, object_id, e))?
    {
        tokio::io::AsyncWriteExt::write_all(&mut file, &bytes).await?;
    }
    tokio::io::AsyncWriteExt::flush(&mut file).await?;

    Ok(())
}
