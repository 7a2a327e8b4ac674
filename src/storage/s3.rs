use super::OperatorStore;
use crate::config::S3Settings;
use crate::error::Result;
use opendal::services::S3;

impl OperatorStore {
    /// S3 及兼容服务（阿里云 OSS 通过其 S3 兼容端点访问）
    pub fn s3(settings: &S3Settings, read_chunk: u64) -> Result<Self> {
        let mut builder = S3::default()
            .bucket(&settings.bucket)
            .region(&settings.region)
            .access_key_id(&settings.access_key_id)
            .secret_access_key(&settings.secret_access_key);

        if let Some(ref ep) = settings.endpoint {
            builder = builder.endpoint(ep);
        }

        if let Some(ref p) = settings.prefix {
            builder = builder.root(p);
        }

        if settings.virtual_host_style {
            builder = builder.enable_virtual_host_style();
        }

        let name = format!(
            "s3://{}{}",
            settings.bucket,
            settings
                .prefix
                .as_deref()
                .map(|p| format!("/{}", p.trim_matches('/')))
                .unwrap_or_default()
        );

        Self::from_builder(builder, name, read_chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ObjectStore;

    #[test]
    fn test_s3_store_name_includes_prefix() {
        let settings = S3Settings {
            bucket: "assets".into(),
            region: "us-east-1".into(),
            access_key_id: "id".into(),
            secret_access_key: "secret".into(),
            endpoint: Some("http://127.0.0.1:9000".into()),
            prefix: Some("/media/".into()),
            virtual_host_style: false,
        };
        let store = OperatorStore::s3(&settings, 1024).unwrap();
        assert_eq!(store.name(), "s3://assets/media");
    }
}
