mod common;

use cofre_client::ClientError;
use cofre_core::{FlowDirection, RemoteJobState};
use cofre_signer::Signer;
use cofre_store::{JobCache, JobCacheRepo};
use common::*;
use httpmock::Method::POST;
use httpmock::MockServer;
use tempfile::tempdir;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;

fn ts(s: &str) -> OffsetDateTime {
    OffsetDateTime::parse(s, &Rfc3339).unwrap()
}

fn january() -> (OffsetDateTime, OffsetDateTime) {
    (ts("2024-01-01T00:00:00Z"), ts("2024-01-31T23:59:59Z"))
}

#[tokio::test]
async fn submit_accepted_yields_job() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/SolicitaDescargaService.svc");
            then.status(200).body(submit_ok("JOB-1"));
        })
        .await;

    let client = client(&server.base_url());
    let s = signer();
    let (start, end) = january();
    let job = client
        .submit(&s, FlowDirection::Issued, start, end, None)
        .await
        .unwrap();

    assert_eq!(job.remote_job_id, "JOB-1");
    assert_eq!(job.rfc.as_str(), RFC);
    assert_eq!(job.flow, FlowDirection::Issued);
    mock.assert_async().await;
}

#[tokio::test]
async fn submit_rejection_surfaces_code_and_message() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/SolicitaDescargaService.svc");
            then.status(200).body(submit_code("305", "Certificado Invalido"));
        })
        .await;

    let client = client(&server.base_url());
    let s = signer();
    let (start, end) = january();
    let err = client
        .submit(&s, FlowDirection::Issued, start, end, None)
        .await
        .unwrap_err();

    match err {
        ClientError::RemoteRejected { code, message } => {
            assert_eq!(code, "305");
            assert_eq!(message, "Certificado Invalido");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn submit_quota_code_maps_to_quota_exceeded() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/SolicitaDescargaService.svc");
            then.status(200)
                .body(submit_code("5002", "Se han agotado las solicitudes de por vida"));
        })
        .await;

    let client = client(&server.base_url());
    let s = signer();
    let (start, end) = january();
    let err = client
        .submit(&s, FlowDirection::Issued, start, end, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::QuotaExceeded));
}

#[tokio::test]
async fn poll_reports_state_count_and_packages() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/VerificaSolicitudDescargaService.svc");
            then.status(200)
                .body(poll_response(3, "5000", 42, &["PKG_01", "PKG_02"]));
        })
        .await;

    let client = client(&server.base_url());
    let poll = client.poll(&signer(), "JOB-1").await.unwrap();
    assert_eq!(poll.state, RemoteJobState::Finished);
    assert_eq!(poll.cfdi_count, 42);
    assert_eq!(poll.package_ids, vec!["PKG_01", "PKG_02"]);
    assert!(poll.is_finished());
}

#[tokio::test]
async fn run_full_zero_results_short_circuits_without_timeout() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/SolicitaDescargaService.svc");
            then.status(200).body(submit_ok("JOB-EMPTY"));
        })
        .await;
    // Every poll: in progress, no packages, no documents
    let poll_mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/VerificaSolicitudDescargaService.svc");
            then.status(200).body(poll_response(2, "5000", 0, &[]));
        })
        .await;

    let temp = tempdir().unwrap();
    let cache = JobCache::open(temp.path()).await.unwrap();
    let client = client(&server.base_url());
    let s = signer();
    let (start, end) = january();
    let dest = temp.path().join("out");

    let outcome = client
        .run_full(
            &s,
            &cache,
            FlowDirection::Issued,
            start,
            end,
            &dest,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.zero_results);
    assert_eq!(outcome.cfdi_count, 0);
    assert!(outcome.xml_files.is_empty());
    // The short-circuit fired at the configured limit, not the attempt cap
    assert_eq!(poll_mock.hits_async().await, 6);
}

#[tokio::test]
async fn run_full_no_data_code_is_immediate_empty_success() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/SolicitaDescargaService.svc");
            then.status(200).body(submit_ok("JOB-EMPTY"));
        })
        .await;
    let poll_mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/VerificaSolicitudDescargaService.svc");
            then.status(200).body(poll_response(3, "5004", 0, &[]));
        })
        .await;

    let temp = tempdir().unwrap();
    let cache = JobCache::open(temp.path()).await.unwrap();
    let client = client(&server.base_url());
    let s = signer();
    let (start, end) = january();

    let outcome = client
        .run_full(
            &s,
            &cache,
            FlowDirection::Issued,
            start,
            end,
            &temp.path().join("out"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.zero_results);
    assert_eq!(poll_mock.hits_async().await, 1);
}

#[tokio::test]
async fn run_full_fetches_and_unpacks_packages() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/SolicitaDescargaService.svc");
            then.status(200).body(submit_ok("JOB-FULL"));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/VerificaSolicitudDescargaService.svc");
            then.status(200).body(poll_response(3, "5000", 2, &["PKG_01"]));
        })
        .await;
    let package = package_b64(&[
        (
            "doc-a.xml",
            &cfdi_xml("AD662D33-6934-459C-A128-BDF0393E0F44", "I", "100.00"),
        ),
        (
            "doc-b.xml",
            &cfdi_xml("BD662D33-6934-459C-A128-BDF0393E0F45", "E", "50.00"),
        ),
    ]);
    server
        .mock_async(|when, then| {
            when.method(POST).path("/DescargaMasivaService.svc");
            then.status(200).body(fetch_response(&package));
        })
        .await;

    let temp = tempdir().unwrap();
    let cache = JobCache::open(temp.path()).await.unwrap();
    let client = client(&server.base_url());
    let s = signer();
    let (start, end) = january();
    let dest = temp.path().join("out");

    let outcome = client
        .run_full(
            &s,
            &cache,
            FlowDirection::Issued,
            start,
            end,
            &dest,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!outcome.zero_results);
    assert_eq!(outcome.packages_total, 1);
    assert_eq!(outcome.packages_fetched, 1);
    assert_eq!(outcome.xml_files.len(), 2);
    assert!(outcome.package_failures.is_empty());
    for path in &outcome.xml_files {
        assert!(path.exists());
    }
}

#[tokio::test]
async fn second_run_reuses_cached_job_without_resubmitting() {
    let server = MockServer::start_async().await;
    let submit_mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/SolicitaDescargaService.svc");
            then.status(200).body(submit_ok("JOB-CACHED"));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/VerificaSolicitudDescargaService.svc");
            then.status(200).body(poll_response(3, "5004", 0, &[]));
        })
        .await;

    let temp = tempdir().unwrap();
    let cache = JobCache::open(temp.path()).await.unwrap();
    let client = client(&server.base_url());
    let s = signer();
    let (start, end) = january();
    let dest = temp.path().join("out");
    let cancel = CancellationToken::new();

    let first = client
        .run_full(&s, &cache, FlowDirection::Issued, start, end, &dest, &cancel)
        .await
        .unwrap();
    assert!(!first.reused_job);

    let second = client
        .run_full(&s, &cache, FlowDirection::Issued, start, end, &dest, &cancel)
        .await
        .unwrap();
    assert!(second.reused_job);
    assert_eq!(second.job.remote_job_id, "JOB-CACHED");

    // Identical period within the validity window: exactly one submission
    assert_eq!(submit_mock.hits_async().await, 1);
}

#[tokio::test]
async fn quota_exhaustion_falls_back_to_covering_cached_job() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/SolicitaDescargaService.svc");
            then.status(200).body(submit_code("5002", "quota"));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/VerificaSolicitudDescargaService.svc");
            then.status(200).body(poll_response(3, "5004", 0, &[]));
        })
        .await;

    let temp = tempdir().unwrap();
    let cache = JobCache::open(temp.path()).await.unwrap();
    let s = signer();

    // A cached quarter-long job fully contains the requested month
    let covering = cofre_core::RetrievalJob::new(
        s.rfc().clone(),
        FlowDirection::Issued,
        ts("2024-01-01T00:00:00Z"),
        ts("2024-03-31T23:59:59Z"),
        "JOB-QUARTER",
    );
    cache.store(&covering).await.unwrap();

    let client = client(&server.base_url());
    let outcome = client
        .run_full(
            &s,
            &cache,
            FlowDirection::Issued,
            ts("2024-02-01T00:00:00Z"),
            ts("2024-02-29T23:59:59Z"),
            &temp.path().join("out"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.reused_job);
    assert_eq!(outcome.job.remote_job_id, "JOB-QUARTER");
}

#[tokio::test]
async fn quota_exhaustion_without_cover_surfaces_quota_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/SolicitaDescargaService.svc");
            then.status(200).body(submit_code("5002", "quota"));
        })
        .await;

    let temp = tempdir().unwrap();
    let cache = JobCache::open(temp.path()).await.unwrap();
    let client = client(&server.base_url());
    let s = signer();
    let (start, end) = january();

    let err = client
        .run_full(
            &s,
            &cache,
            FlowDirection::Issued,
            start,
            end,
            &temp.path().join("out"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::QuotaExceeded));
}

#[tokio::test]
async fn rejected_job_state_aborts_run() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/SolicitaDescargaService.svc");
            then.status(200).body(submit_ok("JOB-BAD"));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/VerificaSolicitudDescargaService.svc");
            then.status(200).body(poll_response(5, "5000", 0, &[]));
        })
        .await;

    let temp = tempdir().unwrap();
    let cache = JobCache::open(temp.path()).await.unwrap();
    let client = client(&server.base_url());
    let s = signer();
    let (start, end) = january();

    let err = client
        .run_full(
            &s,
            &cache,
            FlowDirection::Issued,
            start,
            end,
            &temp.path().join("out"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RemoteRejected { .. }));
}

#[tokio::test]
async fn cancelled_token_stops_polling() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/SolicitaDescargaService.svc");
            then.status(200).body(submit_ok("JOB-CANCEL"));
        })
        .await;

    let temp = tempdir().unwrap();
    let cache = JobCache::open(temp.path()).await.unwrap();
    let client = client(&server.base_url());
    let s = signer();
    let (start, end) = january();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = client
        .run_full(
            &s,
            &cache,
            FlowDirection::Issued,
            start,
            end,
            &temp.path().join("out"),
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Cancelled));
}

#[tokio::test]
async fn missing_package_is_isolated_per_package() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/SolicitaDescargaService.svc");
            then.status(200).body(submit_ok("JOB-MIXED"));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/VerificaSolicitudDescargaService.svc");
            then.status(200)
                .body(poll_response(3, "5000", 1, &["PKG_EMPTY"]));
        })
        .await;
    // The service answers but with an empty package blob
    server
        .mock_async(|when, then| {
            when.method(POST).path("/DescargaMasivaService.svc");
            then.status(200).body(fetch_response(""));
        })
        .await;

    let temp = tempdir().unwrap();
    let cache = JobCache::open(temp.path()).await.unwrap();
    let client = client(&server.base_url());
    let s = signer();
    let (start, end) = january();

    let outcome = client
        .run_full(
            &s,
            &cache,
            FlowDirection::Issued,
            start,
            end,
            &temp.path().join("out"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.packages_total, 1);
    assert_eq!(outcome.packages_fetched, 0);
    assert_eq!(outcome.package_failures.len(), 1);
    assert_eq!(outcome.package_failures[0].0, "PKG_EMPTY");
}
