//! HTTP client for end-to-end tests
//!
//! This module provides a high-level HTTP client that wraps reqwest
//! and provides methods for all tunefetch-server endpoints.
//!
//! When API routes or request formats change, update only this file.

#![allow(dead_code)]

use super::constants::*;
use reqwest::header::{HeaderMap, HeaderValue, RANGE};
use reqwest::Response;
use serde_json::{json, Value};
use std::time::Duration;

/// HTTP test client acting on behalf of one user
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
    user: Option<String>,
}

impl TestClient {
    /// Creates a client that sends no user identity
    ///
    /// Use this for testing that routes reject anonymous callers.
    pub fn anonymous(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            user: None,
        }
    }

    /// Creates a client whose requests carry `user` in the identity header
    pub fn as_user(base_url: String, user: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-user-id",
            HeaderValue::from_str(user).expect("Invalid user id"),
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            user: Some(user.to_string()),
        }
    }

    // ========================================================================
    // Job Endpoints
    // ========================================================================

    /// POST /v1/jobs/single
    pub async fn submit_single(&self, song_id: &str, playlist: Option<&str>) -> Response {
        self.client
            .post(format!("{}/v1/jobs/single", self.base_url))
            .json(&json!({ "song_id": song_id, "playlist": playlist }))
            .send()
            .await
            .expect("Submit single request failed")
    }

    /// POST /v1/jobs/bulk
    pub async fn submit_bulk(&self, song_ids: &[&str], job_id: Option<&str>) -> Response {
        self.client
            .post(format!("{}/v1/jobs/bulk", self.base_url))
            .json(&json!({ "song_ids": song_ids, "job_id": job_id }))
            .send()
            .await
            .expect("Submit bulk request failed")
    }

    /// GET /v1/jobs
    pub async fn list_jobs(&self) -> Response {
        self.client
            .get(format!("{}/v1/jobs", self.base_url))
            .send()
            .await
            .expect("List jobs request failed")
    }

    /// GET /v1/jobs/{id}
    pub async fn get_job(&self, job_id: &str) -> Response {
        self.client
            .get(format!("{}/v1/jobs/{}", self.base_url, job_id))
            .send()
            .await
            .expect("Get job request failed")
    }

    /// DELETE /v1/jobs/{id}
    pub async fn cancel_job(&self, job_id: &str) -> Response {
        self.client
            .delete(format!("{}/v1/jobs/{}", self.base_url, job_id))
            .send()
            .await
            .expect("Cancel job request failed")
    }

    /// Submits a job and returns its id, asserting the submission was accepted
    pub async fn submit_single_id(&self, song_id: &str, playlist: Option<&str>) -> String {
        let response = self.submit_single(song_id, playlist).await;
        assert!(
            response.status().is_success(),
            "Submission failed: {}",
            response.status()
        );
        let body: Value = response.json().await.expect("Invalid submit response");
        body["job_id"].as_str().expect("No job id").to_string()
    }

    /// Polls the job until its status is `status`, returning the job body
    ///
    /// # Panics
    ///
    /// Panics if the job does not reach `status` within the timeout.
    pub async fn wait_for_status(&self, job_id: &str, status: &str) -> Value {
        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(JOB_WAIT_TIMEOUT_MS);
        loop {
            let response = self.get_job(job_id).await;
            if response.status().is_success() {
                let job: Value = response.json().await.expect("Invalid job body");
                if job["status"] == status {
                    return job;
                }
                if start.elapsed() > timeout {
                    panic!("Job {} stuck in {} (wanted {})", job_id, job["status"], status);
                }
            } else if start.elapsed() > timeout {
                panic!("Job {} not readable: {}", job_id, response.status());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    // ========================================================================
    // File Endpoints
    // ========================================================================

    /// GET /v1/jobs/{id}/file
    pub async fn get_job_file(&self, job_id: &str, range: Option<&str>) -> Response {
        let mut request = self
            .client
            .get(format!("{}/v1/jobs/{}/file", self.base_url, job_id));
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        request.send().await.expect("Get job file request failed")
    }

    /// GET /v1/songs/{id}/file
    pub async fn get_song_file(&self, song_id: &str, range: Option<&str>) -> Response {
        let mut request = self
            .client
            .get(format!("{}/v1/songs/{}/file", self.base_url, song_id));
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        request.send().await.expect("Get song file request failed")
    }

    // ========================================================================
    // Live Updates
    // ========================================================================

    /// GET /v1/events - returns the open streaming response
    pub async fn open_events(&self) -> Response {
        // No overall timeout: the stream stays open until dropped.
        let mut request = reqwest::Client::new().get(format!("{}/v1/events", self.base_url));
        if let Some(user) = &self.user {
            request = request.header("x-user-id", user.as_str());
        }
        request.send().await.expect("Events request failed")
    }
}
