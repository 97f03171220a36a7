use crate::progress::TestUploadProgressCallback;
use crate::Result;
use artifacts::{Config, UploadError, Uploader};
use artifacts_testing::save_server::{SaveServer, StatusCode};
use artifacts_testing::test_data::{self, TestFile, TestFileWithData};
use assert_matches::assert_matches;
use std::collections::HashMap;
use std::time::Duration;
use tempfile::TempDir;

const JOB_PREFIX: &str = "/owner/repo/jobs/1234/artifacts/7/7.2";

fn make_test_files() -> Result<(TempDir, HashMap<String, TestFileWithData>)> {
    let dir = tempfile::tempdir()?;
    let test_data = test_data::make_test_tree(
        &dir.path().join("build"),
        [
            TestFile::new("report.csv", "300"),
            TestFile::new("bin/tool", "64 KiB"),
            TestFile::new("logs/test.log", "2 KiB"),
        ],
    )?;

    Ok((dir, test_data))
}

fn config_for_server(server: &SaveServer, dir: &TempDir) -> Config {
    Config {
        provider: "artifacts".to_string(),
        save_host: server.url(),
        auth_token: "s3cr3t".to_string(),
        repo_slug: "owner/repo".to_string(),
        job_id: "1234".to_string(),
        job_number: "7.2".to_string(),
        paths: vec!["build".to_string()],
        target_paths: vec!["artifacts/7/7.2".to_string()],
        working_dir: dir.path().to_path_buf(),
        concurrency: 2,
        retries: 2,
        retry_interval: Duration::from_millis(1),
        ..Default::default()
    }
}

#[test]
fn uploads_with_job_headers() -> Result<()> {
    artifacts_testing::logging::test_with_logging(async move {
        let server = SaveServer::start().await?;
        let (dir, test_data) = make_test_files()?;
        let progress = TestUploadProgressCallback::new();

        let summary = Uploader::new(config_for_server(&server, &dir))
            .run(futures::future::pending(), progress.clone())
            .await?;

        assert!(summary.is_success());
        progress.sanity_check_updates();

        let requests = server.requests();
        assert_eq!(3, requests.len());

        for request in &requests {
            assert_eq!("PUT", request.method.as_str());

            let dest = request
                .path
                .strip_prefix("/owner/repo/jobs/1234/")
                .unwrap_or_else(|| panic!("Unexpected save path {}", request.path));
            let relative = dest.strip_prefix("artifacts/7/7.2/").unwrap();
            let test_file = &test_data[relative];

            assert_eq!(Some(dest), request.header("Artifacts-Dest"));
            assert_eq!(Some("owner/repo"), request.header("Artifacts-Repo-Slug"));
            assert_eq!(Some("7.2"), request.header("Artifacts-Job-Number"));
            assert_eq!(
                Some(&*test_file.full_path.to_string_lossy()),
                request.header("Artifacts-Source")
            );
            assert_eq!(
                Some(test_file.data.len().to_string().as_str()),
                request.header("Artifacts-Size")
            );
            assert_eq!(Some("token s3cr3t"), request.header("Authorization"));
        }

        let report = requests
            .iter()
            .find(|request| request.path.ends_with("/report.csv"))
            .unwrap();
        assert_eq!(
            Some("text/csv; charset=utf-8"),
            report.header("Content-Type")
        );

        let uploaded = requests
            .into_iter()
            .map(|request| (request.path, request.body))
            .collect::<HashMap<_, _>>();
        test_data::validate_uploaded_data(&test_data, JOB_PREFIX, &uploaded);

        Ok(())
    })
}

#[test]
fn no_auth_header_without_token() -> Result<()> {
    artifacts_testing::logging::test_with_logging(async move {
        let server = SaveServer::start().await?;
        let (dir, _test_data) = make_test_files()?;
        let config = Config {
            auth_token: String::new(),
            ..config_for_server(&server, &dir)
        };

        let summary = artifacts::upload(config).await?;

        assert!(summary.is_success());
        assert!(server
            .requests()
            .iter()
            .all(|request| request.header("Authorization").is_none()));

        Ok(())
    })
}

#[test]
fn transient_errors_are_retried() -> Result<()> {
    artifacts_testing::logging::test_with_logging(async move {
        let server = SaveServer::start().await?;
        server.fail_next(2);
        let (dir, test_data) = make_test_files()?;
        let progress = TestUploadProgressCallback::new();

        let summary = Uploader::new(config_for_server(&server, &dir))
            .run(futures::future::pending(), progress.clone())
            .await?;

        assert!(summary.is_success());
        assert_eq!(test_data.len() + 2, server.requests().len());
        assert_eq!(2, progress.artifact_retrying().len());
        progress.sanity_check_updates();

        Ok(())
    })
}

#[test]
fn rejected_uploads_fail() -> Result<()> {
    artifacts_testing::logging::test_with_logging(async move {
        let server = SaveServer::start().await?;
        server.respond_with(StatusCode::FORBIDDEN);
        let (dir, test_data) = make_test_files()?;

        let summary = artifacts::upload(config_for_server(&server, &dir)).await?;

        assert_eq!(0, summary.uploaded());
        assert_eq!(test_data.len(), summary.failures().len());
        for artifact in summary.failures() {
            assert_matches!(
                artifact.upload_result().err(),
                Some(UploadError::SaveServiceRejected { status: 403, .. })
            );
        }

        // The first attempt plus two retries for each artifact
        assert_eq!(test_data.len() * 3, server.requests().len());

        Ok(())
    })
}

#[test]
fn unreachable_server_fails_uploads() -> Result<()> {
    artifacts_testing::logging::test_with_logging(async move {
        let (dir, test_data) = make_test_files()?;

        // Grab a free port, then close it again so nothing is listening there
        let addr = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?;
        let config = Config {
            save_host: format!("http://{addr}"),
            provider: "artifacts".to_string(),
            paths: vec!["build".to_string()],
            working_dir: dir.path().to_path_buf(),
            retries: 0,
            ..Default::default()
        };

        let summary = artifacts::upload(config).await?;

        assert_eq!(test_data.len(), summary.failures().len());
        for artifact in summary.failures() {
            assert_matches!(
                artifact.upload_result().err(),
                Some(UploadError::SaveServiceRequest { .. })
            );
        }

        Ok(())
    })
}
