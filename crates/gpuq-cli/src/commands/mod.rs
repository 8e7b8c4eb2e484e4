//! CLI commands implementation

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// API client for communicating with the daemon
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Full task record from the API
#[derive(Debug, Deserialize)]
pub struct TaskResponse {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub gpu_type: String,
    pub gpu_count: u32,
    pub command: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub assigned_gpus: Vec<u32>,
    pub session_name: Option<String>,
    pub log_path: Option<String>,
    pub exit_code: Option<i64>,
    pub error: Option<String>,
}

/// Task summary row from the API
#[derive(Debug, Deserialize)]
pub struct TaskSummaryResponse {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub gpu_type: String,
    pub gpu_count: u32,
    pub created_at: String,
}

/// GPU view from the API
#[derive(Debug, Deserialize)]
pub struct GpuResponse {
    pub index: u32,
    pub name: Option<String>,
    pub memory_total: Option<u64>,
    pub memory_used: Option<u64>,
    pub utilization: Option<u32>,
    pub assigned_task_id: Option<i64>,
    pub is_free: bool,
}

/// GPU status report from the API
#[derive(Debug, Deserialize)]
pub struct GpuReportResponse {
    pub gpus: Vec<GpuResponse>,
    pub error: Option<String>,
}

/// Log tail response
#[derive(Debug, Deserialize)]
pub struct LogsResponse {
    pub lines: Vec<String>,
    pub truncated: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

async fn error_text(response: reqwest::Response) -> String {
    match response.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(e) => format!("unreadable error response: {}", e),
    }
}

/// Submit a task
pub async fn submit(
    client: &ApiClient,
    gpu_type: String,
    gpus: u32,
    name: Option<String>,
    command: String,
) -> Result<()> {
    let name = name.unwrap_or_else(|| {
        command
            .split_whitespace()
            .next()
            .unwrap_or("task")
            .to_string()
    });

    #[derive(Serialize)]
    struct CreateRequest {
        name: String,
        gpu_type: String,
        gpu_count: u32,
        command: String,
    }

    let req = CreateRequest {
        name,
        gpu_type,
        gpu_count: gpus,
        command,
    };

    let response = client
        .client
        .post(client.url("/api/tasks"))
        .json(&req)
        .send()
        .await?;

    if response.status().is_success() {
        let task: TaskResponse = response.json().await?;
        println!("Task {} queued", task.id);
        println!("  Name: {}", task.name);
        println!("  GPUs: {}x {}", task.gpu_count, task.gpu_type);
        println!("  Created: {}", task.created_at);
    } else {
        eprintln!("Failed to submit task: {}", error_text(response).await);
    }

    Ok(())
}

/// List all tasks
pub async fn ps(client: &ApiClient) -> Result<()> {
    let response = client.client.get(client.url("/api/tasks")).send().await?;

    if response.status().is_success() {
        let tasks: Vec<TaskSummaryResponse> = response.json().await?;

        if tasks.is_empty() {
            println!("No tasks found");
        } else {
            println!(
                "{:<6} {:<20} {:<10} {:<25} {:<6} {:<28}",
                "ID", "NAME", "STATUS", "GPU TYPE", "GPUS", "CREATED"
            );
            println!("{}", "-".repeat(98));
            for task in tasks {
                println!(
                    "{:<6} {:<20} {:<10} {:<25} {:<6} {:<28}",
                    task.id, task.name, task.status, task.gpu_type, task.gpu_count, task.created_at
                );
            }
        }
    } else {
        eprintln!("Failed to list tasks: {}", error_text(response).await);
    }

    Ok(())
}

/// Show one task in full
pub async fn status(client: &ApiClient, id: i64) -> Result<()> {
    let response = client
        .client
        .get(client.url(&format!("/api/tasks/{}", id)))
        .send()
        .await?;

    if response.status().is_success() {
        let task: TaskResponse = response.json().await?;
        println!("Task {}: {}", task.id, task.name);
        println!("  Status: {}", task.status);
        println!("  GPUs: {}x {}", task.gpu_count, task.gpu_type);
        if !task.assigned_gpus.is_empty() {
            println!("  Assigned: {:?}", task.assigned_gpus);
        }
        if let Some(session) = &task.session_name {
            println!("  Session: {}", session);
        }
        println!("  Created: {}", task.created_at);
        if let Some(started) = &task.started_at {
            println!("  Started: {}", started);
        }
        if let Some(completed) = &task.completed_at {
            println!("  Completed: {}", completed);
        }
        if let Some(exit_code) = task.exit_code {
            println!("  Exit code: {}", exit_code);
        }
        if let Some(error) = &task.error {
            println!("  Error: {}", error);
        }
        if let Some(log_path) = &task.log_path {
            println!("  Log: {}", log_path);
        }
        println!("  Command:");
        for line in task.command.lines() {
            println!("    {}", line);
        }
    } else {
        eprintln!("Task not found: {}", error_text(response).await);
    }

    Ok(())
}

/// Tail a task's log
pub async fn logs(client: &ApiClient, id: i64, tail: Option<usize>) -> Result<()> {
    let mut request = client
        .client
        .get(client.url(&format!("/api/tasks/{}/logs", id)));
    if let Some(tail) = tail {
        request = request.query(&[("tail", tail)]);
    }
    let response = request.send().await?;

    if response.status().is_success() {
        let logs: LogsResponse = response.json().await?;
        for line in &logs.lines {
            println!("{}", line);
        }
        if logs.truncated {
            eprintln!("(older lines truncated)");
        }
    } else {
        eprintln!("Failed to fetch logs: {}", error_text(response).await);
    }

    Ok(())
}

/// Cancel a task
pub async fn cancel(client: &ApiClient, id: i64) -> Result<()> {
    let response = client
        .client
        .post(client.url(&format!("/api/tasks/{}/cancel", id)))
        .send()
        .await?;

    if response.status().is_success() {
        let task: TaskResponse = response.json().await?;
        println!("Task {} cancelled", task.id);
    } else {
        eprintln!("Failed to cancel task: {}", error_text(response).await);
    }

    Ok(())
}

/// Show GPU inventory and occupancy
pub async fn gpus(client: &ApiClient) -> Result<()> {
    let response = client.client.get(client.url("/api/gpus")).send().await?;

    if response.status().is_success() {
        let report: GpuReportResponse = response.json().await?;

        if let Some(error) = &report.error {
            eprintln!("GPU inventory unavailable: {}", error);
        }
        if report.gpus.is_empty() {
            println!("No GPUs reported");
            return Ok(());
        }

        let free = report.gpus.iter().filter(|g| g.is_free).count();
        println!("GPUs: {} total, {} free", report.gpus.len(), free);
        println!();
        for gpu in report.gpus {
            let name = gpu.name.unwrap_or_else(|| "unknown".to_string());
            let memory = match (gpu.memory_used, gpu.memory_total) {
                (Some(used), Some(total)) => format!("{}/{} MiB", used, total),
                _ => "n/a".to_string(),
            };
            let util = gpu
                .utilization
                .map(|u| format!("{}%", u))
                .unwrap_or_else(|| "n/a".to_string());
            let holder = match gpu.assigned_task_id {
                Some(task_id) => format!("task {}", task_id),
                None => "free".to_string(),
            };
            println!(
                "[{}] {} - {} - util {} - {}",
                gpu.index, name, memory, util, holder
            );
        }
    } else {
        eprintln!("Failed to get GPU status: {}", error_text(response).await);
    }

    Ok(())
}

/// Check daemon health
pub async fn health(client: &ApiClient) -> Result<()> {
    #[derive(Deserialize)]
    struct HealthResponse {
        status: String,
    }

    let response = client.client.get(client.url("/api/health")).send().await?;

    if response.status().is_success() {
        let health: HealthResponse = response.json().await?;
        println!("Daemon is {}", health.status);
    } else {
        eprintln!("Daemon unhealthy: HTTP {}", response.status());
    }

    Ok(())
}
