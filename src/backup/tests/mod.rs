// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::test_helpers::*;
use super::*;
use crate::types::{BackupStatus, CourseTask};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod download;
mod pipeline;

/// Drain every update currently buffered in `rx`
fn drain(rx: &mut broadcast::Receiver<StatusUpdate>) -> Vec<StatusUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}
