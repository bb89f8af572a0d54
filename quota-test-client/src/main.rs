// src/main.rs

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::error::Error;

// Response types
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct RequestSummary {
    id: u64,
    status: String,
    amount: String,
    is_overdue_snapshot: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Prints either the typed success body or the service's error body.
async fn report<T: for<'de> Deserialize<'de> + std::fmt::Debug>(
    label: &str,
    response: reqwest::Response,
) -> Result<Option<T>, Box<dyn Error>> {
    let status = response.status();
    println!("{} -> {}", label, status);
    if status.is_success() {
        let body = response.json::<T>().await?;
        println!("  {:?}", body);
        Ok(Some(body))
    } else {
        let body = response.json::<ErrorBody>().await?;
        println!("  refused: {} ({})", body.code, body.message);
        Ok(None)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let base_url = std::env::var("QUOTA_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let employee = std::env::args().nth(1).unwrap_or_else(|| "EMP-SMOKE".to_string());
    let date = std::env::args().nth(2).unwrap_or_else(|| "2026-03-09".to_string());
    let month = std::env::args().nth(3).unwrap_or_else(|| "March-2026".to_string());
    let client = Client::new();

    // Test 1: Health check
    println!("\n🔍 Testing health check endpoint...");
    let health = client
        .get(format!("{}/health", base_url))
        .send()
        .await?
        .json::<HealthResponse>()
        .await?;
    println!("Health check response: {:?}", health);

    // Test 2: Book a 30 minute permission
    println!("\n🔍 Booking a permission for {} on {}...", employee, date);
    let created = client
        .post(format!("{}/api/permissions", base_url))
        .json(&json!({
            "employee_id": employee,
            "month": month,
            "date": date,
            "start_time": "09:00",
            "end_time": "09:30",
        }))
        .send()
        .await?;
    let created = report::<RequestSummary>("Create permission", created).await?;

    // Test 3: Same slot again must be refused
    println!("\n🔍 Re-submitting the same slot...");
    let duplicate = client
        .post(format!("{}/api/permissions", base_url))
        .json(&json!({
            "employee_id": employee,
            "month": month,
            "date": date,
            "start_time": "09:00",
            "end_time": "10:00",
        }))
        .send()
        .await?;
    if duplicate.status() != StatusCode::CONFLICT {
        println!("⚠️ Expected 409 for a duplicate, got {}", duplicate.status());
    }
    report::<RequestSummary>("Duplicate permission", duplicate).await?;

    // Test 4: Ledger stats
    println!("\n🔍 Fetching permission ledger...");
    let ledger_url = format!("{}/api/ledgers/{}/{}/permission", base_url, employee, month);
    let stats = client.get(&ledger_url).send().await?;
    report::<Value>("Ledger stats", stats).await?;

    // Test 5: Cancel and confirm the minutes came back
    if let Some(request) = created {
        println!("\n🔍 Cancelling request {}...", request.id);
        let cancelled = client
            .post(format!("{}/api/requests/{}/cancel", base_url, request.id))
            .json(&json!({ "actor_id": employee }))
            .send()
            .await?;
        report::<RequestSummary>("Cancel", cancelled).await?;

        let stats = client.get(&ledger_url).send().await?;
        report::<Value>("Ledger stats after cancel", stats).await?;
    }

    println!("\n✅ Testing complete!");
    Ok(())
}
