use crate::Result;
use artifacts::{Config, Permission, DEFAULT_CACHE_CONTROL};
use artifacts_testing::minio::{MinioServer, MINIO_CREDENTIALS};
use artifacts_testing::test_data::{self, TestFile};
use std::collections::HashMap;

fn config_for_minio(server: &MinioServer, bucket: &str, working_dir: &std::path::Path) -> Config {
    Config {
        provider: "s3".to_string(),
        bucket_name: bucket.to_string(),
        access_key: MINIO_CREDENTIALS.to_string(),
        secret_key: MINIO_CREDENTIALS.to_string(),
        s3_endpoint: Some(server.endpoint_url()),
        working_dir: working_dir.to_path_buf(),
        paths: vec!["dist".to_string()],
        target_paths: vec!["artifacts/42/42.1".to_string()],
        concurrency: 4,
        ..Default::default()
    }
}

#[test]
#[ignore = "requires minio"]
fn uploads_tree_to_bucket() -> Result<()> {
    artifacts_testing::logging::test_with_logging(async move {
        let server = MinioServer::get().await?;
        let bucket = server.create_bucket("uploads_tree_to_bucket").await?;
        let dir = tempfile::tempdir()?;
        let test_data = test_data::make_test_tree(
            &dir.path().join("dist"),
            [
                TestFile::new("index.html", "2 KiB"),
                TestFile::new("app.tar.gz", "5 MiB"),
                TestFile::new("docs/notes.txt", "100"),
                TestFile::new("docs/deep/nested/data.bin", "10 KiB"),
            ],
        )?;

        let summary = artifacts::upload(config_for_minio(&server, &bucket, dir.path())).await?;
        assert!(summary.is_success());

        let keys = server.list_keys(&bucket).await?;
        assert_eq!(test_data.len(), keys.len());

        let mut uploaded = HashMap::new();
        for key in keys {
            let object = server.get_object(&bucket, &key).await?;
            assert_eq!(Some(DEFAULT_CACHE_CONTROL), object.cache_control.as_deref());
            uploaded.insert(key, object.data);
        }

        test_data::validate_uploaded_data(&test_data, "artifacts/42/42.1", &uploaded);

        let notes = server
            .get_object(&bucket, "artifacts/42/42.1/docs/notes.txt")
            .await?;
        assert_eq!(
            Some("text/plain; charset=utf-8"),
            notes.content_type.as_deref()
        );

        Ok(())
    })
}

#[test]
#[ignore = "requires minio"]
fn custom_cache_control_and_permission() -> Result<()> {
    artifacts_testing::logging::test_with_logging(async move {
        let server = MinioServer::get().await?;
        let bucket = server.create_bucket("custom_cache_control").await?;
        let dir = tempfile::tempdir()?;
        let test_data = test_data::make_test_tree(
            &dir.path().join("dist"),
            [TestFile::new("report", "1 KiB")],
        )?;

        let config = Config {
            cache_control: Some("no-cache".to_string()),
            permission: Permission::PublicRead,
            paths: vec!["dist/report:renamed/report.bin".to_string()],
            ..config_for_minio(&server, &bucket, dir.path())
        };

        let summary = artifacts::upload(config).await?;
        assert!(summary.is_success());

        let key = "artifacts/42/42.1/renamed/report.bin";
        assert_eq!(vec![key.to_string()], server.list_keys(&bucket).await?);

        let object = server.get_object(&bucket, key).await?;
        assert_eq!(Some("no-cache"), object.cache_control.as_deref());
        assert_eq!(test_data["report"].data, object.data);

        Ok(())
    })
}

#[test]
#[ignore = "requires minio"]
fn missing_bucket_fails_every_artifact() -> Result<()> {
    artifacts_testing::logging::test_with_logging(async move {
        let server = MinioServer::get().await?;
        let dir = tempfile::tempdir()?;
        test_data::make_test_tree(
            &dir.path().join("dist"),
            [TestFile::new("a", "10"), TestFile::new("b", "10")],
        )?;

        let config = Config {
            retries: 0,
            ..config_for_minio(&server, "this-bucket-does-not-exist", dir.path())
        };

        let summary = artifacts::upload(config).await?;
        assert_eq!(0, summary.uploaded());
        assert_eq!(2, summary.failures().len());

        Ok(())
    })
}
