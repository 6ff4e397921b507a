//! End-to-end tests for file retrieval: ranges, names and the local flag

mod common;

use common::*;
use reqwest::header::{ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::StatusCode;
use std::io::Read;
use tunefetch_server::catalog::CatalogStore;

const SONG_1_CONTENT: &str = "audio of Daft Punk - One More Time";

async fn completed_single(client: &TestClient, song_id: &str) -> String {
    let job_id = client.submit_single_id(song_id, None).await;
    client.wait_for_status(&job_id, "completed").await;
    job_id
}

#[tokio::test]
async fn test_job_file_is_served_whole() {
    let server = TestServer::spawn().await;
    let client = TestClient::as_user(server.base_url.clone(), TEST_USER);
    let job_id = completed_single(&client, SONG_1_ID).await;

    let response = client.get_job_file(&job_id, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "audio/mpeg");
    assert_eq!(response.headers()[ACCEPT_RANGES], "bytes");
    assert_eq!(
        response.headers()[CONTENT_DISPOSITION],
        "attachment; filename=\"Daft Punk - One More Time.mp3\"; \
         filename*=UTF-8''Daft%20Punk%20-%20One%20More%20Time.mp3"
    );
    assert_eq!(response.text().await.unwrap(), SONG_1_CONTENT);
}

#[tokio::test]
async fn test_job_file_byte_ranges() {
    let server = TestServer::spawn().await;
    let client = TestClient::as_user(server.base_url.clone(), TEST_USER);
    let job_id = completed_single(&client, SONG_1_ID).await;
    let length = SONG_1_CONTENT.len();

    let response = client.get_job_file(&job_id, Some("bytes=0-4")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()[CONTENT_RANGE],
        format!("bytes 0-4/{}", length).as_str()
    );
    assert_eq!(response.text().await.unwrap(), "audio");

    // Suffix range: the last 4 bytes.
    let response = client.get_job_file(&job_id, Some("bytes=-4")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.text().await.unwrap(), "Time");

    // Open ended range.
    let response = client.get_job_file(&job_id, Some("bytes=9-")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.text().await.unwrap(), &SONG_1_CONTENT[9..]);

    let response = client
        .get_job_file(&job_id, Some(&format!("bytes={}-", length)))
        .await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers()[CONTENT_RANGE],
        format!("bytes */{}", length).as_str()
    );
}

#[tokio::test]
async fn test_job_file_requires_completed_owned_job() {
    let server = TestServer::spawn_with(FakeExtractor::failing(10)).await;
    let client = TestClient::as_user(server.base_url.clone(), TEST_USER);

    let job_id = client.submit_single_id(SONG_1_ID, None).await;
    client.wait_for_status(&job_id, "failed").await;
    let response = client.get_job_file(&job_id, None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let other = TestClient::as_user(server.base_url.clone(), OTHER_USER);
    assert_eq!(
        other.get_job_file(&job_id, None).await.status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        client.get_job_file("missing", None).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_bulk_archive_is_downloadable() {
    let server = TestServer::spawn().await;
    let client = TestClient::as_user(server.base_url.clone(), TEST_USER);

    client
        .submit_bulk(&[SONG_1_ID, SONG_2_ID, SONG_4_ID], Some("three-songs"))
        .await;
    client.wait_for_status("three-songs", "completed").await;

    let response = client.get_job_file("three-songs", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/zip");
    assert!(response.headers()[CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("filename=\"three-songs.zip\""));

    let bytes = response.bytes().await.unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
    assert_eq!(archive.len(), 3);
    let mut content = String::new();
    archive
        .by_name("Massive Attack - Teardrop.mp3")
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    assert_eq!(content, "audio of Massive Attack - Teardrop");
}

#[tokio::test]
async fn test_song_file_refreshes_local_flag() {
    let server = TestServer::spawn().await;
    let client = TestClient::as_user(server.base_url.clone(), TEST_USER);
    completed_single(&client, SONG_1_ID).await;

    let response = client.get_song_file(SONG_1_ID, Some("bytes=0-4")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.text().await.unwrap(), "audio");

    // The file disappears behind the server's back.
    let produced = server
        .user_dir(TEST_USER)
        .join(PLAYLIST_NAME)
        .join("Daft Punk - One More Time.mp3");
    std::fs::remove_file(&produced).unwrap();

    let response = client.get_song_file(SONG_1_ID, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let song = server.catalog.get_song_by_id(SONG_1_ID).unwrap().unwrap();
    assert!(!song.local);
    assert!(song.downloaded);

    // A file put back by hand is found again and the flag follows.
    std::fs::write(&produced, SONG_1_CONTENT).unwrap();
    let response = client.get_song_file(SONG_1_ID, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let song = server.catalog.get_song_by_id(SONG_1_ID).unwrap().unwrap();
    assert!(song.local);
}

#[tokio::test]
async fn test_song_file_from_bulk_folder() {
    let server = TestServer::spawn().await;
    let client = TestClient::as_user(server.base_url.clone(), TEST_USER);

    client.submit_bulk(&[SONG_2_ID, SONG_5_ID], Some("pair")).await;
    client.wait_for_status("pair", "completed").await;

    let response = client.get_song_file(SONG_5_ID, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "audio of Moby - Porcelain");
}

#[tokio::test]
async fn test_song_file_unicode_name() {
    let server = TestServer::spawn().await;
    let client = TestClient::as_user(server.base_url.clone(), TEST_USER);
    completed_single(&client, UNICODE_SONG_ID).await;

    let response = client.get_song_file(UNICODE_SONG_ID, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[CONTENT_DISPOSITION],
        "attachment; filename=\"Bj_rk - J_ga.mp3\"; \
         filename*=UTF-8''Bj%C3%B6rk%20-%20J%C3%B3ga.mp3"
    );
}

#[tokio::test]
async fn test_song_file_access_rules() {
    let server = TestServer::spawn().await;
    let client = TestClient::as_user(server.base_url.clone(), TEST_USER);

    assert_eq!(
        client.get_song_file(OTHER_SONG_ID, None).await.status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        client.get_song_file("no-such-song", None).await.status(),
        StatusCode::NOT_FOUND
    );
    // Never downloaded: nothing on disk.
    assert_eq!(
        client.get_song_file(SONG_3_ID, None).await.status(),
        StatusCode::NOT_FOUND
    );
}
