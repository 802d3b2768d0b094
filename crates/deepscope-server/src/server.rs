// stdio serve loop
//
// Reads one JSON object per line from the input, dispatches each request
// on its own task so slow tool calls do not block the wire, and writes
// responses one per line to the output. Only responses touch the output
// stream; diagnostics go to stderr via tracing.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::handlers::Gateway;
use crate::rpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, PARSE_ERROR};

/// Serve over process stdin/stdout until the input closes
pub async fn serve(gateway: Arc<Gateway>) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve_io(gateway, stdin, stdout).await
}

/// Serve over arbitrary line-delimited streams (test hook)
pub async fn serve_io<R, W>(gateway: Arc<Gateway>, input: R, output: W) -> anyhow::Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(write_loop(output, rx));

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<JsonRpcRequest>(&line) {
            Ok(request) => {
                let gateway = gateway.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(response) = gateway.dispatch(request).await {
                        send_response(&tx, &response).await;
                    }
                });
            }
            Err(err) => {
                debug!(error = %err, "unparseable request line");
                let response = JsonRpcResponse::failure(
                    serde_json::Value::Null,
                    JsonRpcError::new(PARSE_ERROR, format!("invalid JSON: {err}")),
                );
                send_response(&tx, &response).await;
            }
        }
    }

    drop(tx);
    writer.await?;
    info!("input closed; server shutting down");
    Ok(())
}

async fn send_response(tx: &mpsc::Sender<String>, response: &JsonRpcResponse) {
    match serde_json::to_string(response) {
        Ok(line) => {
            if tx.send(line).await.is_err() {
                error!("response writer is gone");
            }
        }
        Err(err) => error!(error = %err, "failed to serialize response"),
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(mut output: W, mut rx: mpsc::Receiver<String>) {
    while let Some(line) = rx.recv().await {
        if output.write_all(line.as_bytes()).await.is_err()
            || output.write_all(b"\n").await.is_err()
            || output.flush().await.is_err()
        {
            error!("failed to write response; stopping writer");
            return;
        }
    }
}
