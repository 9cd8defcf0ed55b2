use std::collections::HashMap;

use async_trait::async_trait;
use jobq_core::errors::JobqError;
use jobq_core::traits::{JobContext, JobHandler};
use jobq_core::JobqResult;
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;
use tracing::{debug, info};

/// Shell任务载荷
#[derive(Debug, Deserialize)]
struct ShellPayload {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    working_dir: Option<String>,
}

/// Shell任务处理器
///
/// 载荷: {"command": "...", "args": [...], "env": {...}, "working_dir": "..."}
/// 结果包含退出码和标准输出/错误。非零退出码也算执行成功，
/// 由结果中的success字段区分。
pub struct ShellHandler;

impl Default for ShellHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for ShellHandler {
    async fn handle(&self, ctx: &JobContext) -> JobqResult<serde_json::Value> {
        let params: ShellPayload = serde_json::from_value(ctx.payload.clone())
            .map_err(|e| JobqError::invalid_payload(format!("shell任务载荷无效: {e}")))?;
        if params.command.is_empty() {
            return Err(JobqError::invalid_payload("command不能为空"));
        }

        info!(
            "执行Shell任务: job_id={}, command={}, args={:?}",
            ctx.job_id, params.command, params.args
        );

        let mut cmd = Command::new(&params.command);
        cmd.args(&params.args);
        if let Some(dir) = &params.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &params.env {
            cmd.env(key, value);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| JobqError::invalid_payload(format!("启动命令失败: {e}")))?;

        debug!(
            "Shell任务完成: job_id={}, exit_code={:?}",
            ctx.job_id,
            output.status.code()
        );

        Ok(json!({
            "success": output.status.success(),
            "exit_code": output.status.code(),
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        }))
    }

    fn name(&self) -> &str {
        "shell"
    }
}

/// HTTP任务载荷
#[derive(Debug, Deserialize)]
struct HttpPayload {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    body: Option<serde_json::Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// HTTP任务处理器
///
/// 载荷: {"url": "...", "method": "GET", "headers": {...}, "body": ...}
/// 结果包含状态码和响应体；响应体能解析为JSON时按JSON返回。
pub struct HttpHandler {
    client: reqwest::Client,
}

impl HttpHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for HttpHandler {
    async fn handle(&self, ctx: &JobContext) -> JobqResult<serde_json::Value> {
        let params: HttpPayload = serde_json::from_value(ctx.payload.clone())
            .map_err(|e| JobqError::invalid_payload(format!("http任务载荷无效: {e}")))?;

        let method = reqwest::Method::from_bytes(params.method.to_uppercase().as_bytes())
            .map_err(|_| {
                JobqError::invalid_payload(format!("无效的HTTP方法: {}", params.method))
            })?;
        let url: reqwest::Url = params
            .url
            .parse()
            .map_err(|e| JobqError::invalid_payload(format!("无效的URL {}: {e}", params.url)))?;

        info!(
            "执行HTTP任务: job_id={}, {} {}",
            ctx.job_id, method, url
        );

        let mut request = self.client.request(method, url).timeout(ctx.timeout);
        for (key, value) in &params.headers {
            request = request.header(key, value);
        }
        if let Some(body) = &params.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| JobqError::Internal(format!("HTTP请求失败: {e}")))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| JobqError::Internal(format!("读取响应体失败: {e}")))?;
        let body = serde_json::from_str::<serde_json::Value>(&text)
            .unwrap_or(serde_json::Value::String(text));

        debug!("HTTP任务完成: job_id={}, status={}", ctx.job_id, status);

        Ok(json!({
            "status": status,
            "success": (200..300).contains(&status),
            "body": body,
        }))
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn context(job_type: &str, payload: serde_json::Value) -> JobContext {
        JobContext {
            job_id: "job-1".to_string(),
            job_type: job_type.to_string(),
            payload,
            timeout: Duration::from_secs(5),
            worker_id: "worker-test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_handlers_construct_via_default() {
        let shell = ShellHandler::default();
        assert_eq!(shell.name(), "shell");
        let http = HttpHandler::default();
        assert_eq!(http.name(), "http");
    }

    #[tokio::test]
    async fn test_shell_handler_captures_output() {
        let handler = ShellHandler::new();
        let ctx = context("shell", json!({"command": "echo", "args": ["hello"]}));
        let value = handler.handle(&ctx).await.unwrap();

        assert_eq!(value["success"], json!(true));
        assert_eq!(value["exit_code"], json!(0));
        assert_eq!(value["stdout"], json!("hello\n"));
    }

    #[tokio::test]
    async fn test_shell_handler_reports_nonzero_exit() {
        let handler = ShellHandler::new();
        let ctx = context("shell", json!({"command": "false"}));
        let value = handler.handle(&ctx).await.unwrap();

        assert_eq!(value["success"], json!(false));
        assert_eq!(value["exit_code"], json!(1));
    }

    #[tokio::test]
    async fn test_shell_handler_rejects_bad_payload() {
        let handler = ShellHandler::new();
        let ctx = context("shell", json!({"args": ["no-command"]}));
        let err = handler.handle(&ctx).await.unwrap_err();
        assert!(matches!(err, JobqError::InvalidPayload(_)));

        let ctx = context("shell", json!({"command": ""}));
        let err = handler.handle(&ctx).await.unwrap_err();
        assert!(matches!(err, JobqError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_shell_handler_env_and_working_dir() {
        let handler = ShellHandler::new();
        let ctx = context(
            "shell",
            json!({
                "command": "sh",
                "args": ["-c", "echo $JOBQ_TEST_VAR"],
                "env": {"JOBQ_TEST_VAR": "marker"},
            }),
        );
        let value = handler.handle(&ctx).await.unwrap();
        assert_eq!(value["stdout"], json!("marker\n"));
    }

    #[tokio::test]
    async fn test_http_handler_rejects_bad_method_and_url() {
        let handler = HttpHandler::new();

        let ctx = context("http", json!({"url": "http://localhost", "method": "团购"}));
        let err = handler.handle(&ctx).await.unwrap_err();
        assert!(matches!(err, JobqError::InvalidPayload(_)));

        let ctx = context("http", json!({"url": "not a url"}));
        let err = handler.handle(&ctx).await.unwrap_err();
        assert!(matches!(err, JobqError::InvalidPayload(_)));
    }
}
