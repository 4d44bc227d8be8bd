//! WebSocket 读写泵
//!
//! 每个连接两个循环：写循环独占 socket 的发送端，从出站队列取帧并定时发送 ping；
//! 读循环把文本帧交给 [`ConnectionSession`]。任一循环退出都会取消连接的关闭信号，
//! 另一循环随之退出，最后向 Hub 注销。

use std::time::Duration;

use application::{ConnectionHandle, ConnectionSession, OutboundFrame, RateLimitPolicy};
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::Principal;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// 写循环参数
#[derive(Debug, Clone, Copy)]
struct WriterConfig {
    keepalive_interval: Duration,
    write_timeout: Duration,
}

/// 运行单个 WebSocket 连接直到断开
pub async fn serve(socket: WebSocket, state: AppState, principal: Principal) {
    let realtime = state.realtime.clone();
    let (handle, outbound) = ConnectionHandle::new(
        principal,
        realtime.outbound_queue_capacity,
        state.clock.now(),
    );
    let user_id = handle.user_id();
    let connection_id = handle.connection_id();

    let mut session = ConnectionSession::new(
        handle.clone(),
        state.chat_service.clone(),
        RateLimitPolicy::new(
            realtime.connection_bucket_capacity,
            realtime.connection_refill_per_sec,
        ),
    );

    let (mut sink, stream) = socket.split();

    if let Err(err) = state.hub.register(handle.clone()).await {
        tracing::error!(user_id = %user_id, error = %err, "Hub 注册失败，关闭连接");
        let _ = sink.send(WsMessage::Close(None)).await;
        return;
    }
    session.activate();
    tracing::info!(user_id = %user_id, connection_id = %connection_id, "WebSocket 连接已建立");

    let writer = tokio::spawn(write_loop(
        sink,
        outbound,
        handle.closed_token(),
        WriterConfig {
            keepalive_interval: realtime.keepalive_interval(),
            write_timeout: realtime.write_timeout(),
        },
    ));

    read_loop(
        stream,
        &mut session,
        handle.closed_token(),
        realtime.pong_timeout(),
    )
    .await;

    session.close().await;
    state.hub.unregister(user_id, connection_id).await;
    if let Err(err) = writer.await {
        tracing::warn!(user_id = %user_id, error = %err, "WebSocket 写任务异常结束");
    }

    tracing::info!(user_id = %user_id, connection_id = %connection_id, "WebSocket 连接已断开");
}

/// 读循环：任何入站帧都会刷新心跳截止时间
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    session: &mut ConnectionSession,
    closed: CancellationToken,
    pong_timeout: Duration,
) {
    let user_id = session.user_id();
    let deadline = sleep(pong_timeout);
    tokio::pin!(deadline);

    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            _ = &mut deadline => {
                tracing::warn!(user_id = %user_id, "心跳超时，断开连接");
                break;
            }
            frame = stream.next() => frame,
        };

        let message = match frame {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                tracing::debug!(user_id = %user_id, error = %err, "WebSocket 读取失败");
                break;
            }
            None => break,
        };
        deadline.as_mut().reset(Instant::now() + pong_timeout);

        match message {
            WsMessage::Text(text) => session.handle_text(text.as_str()).await,
            WsMessage::Binary(_) => {
                tracing::debug!(user_id = %user_id, "忽略二进制帧");
            }
            // ping 由底层自动回复 pong
            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            WsMessage::Close(_) => {
                tracing::debug!(user_id = %user_id, "收到关闭帧");
                break;
            }
        }
    }
}

/// 写循环：出站队列、定时 ping、关闭信号
async fn write_loop(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    closed: CancellationToken,
    config: WriterConfig,
) {
    let mut keepalive = interval_at(
        Instant::now() + config.keepalive_interval,
        config.keepalive_interval,
    );

    loop {
        let message = tokio::select! {
            biased;
            _ = closed.cancelled() => {
                let _ = timeout(config.write_timeout, sink.send(WsMessage::Close(None))).await;
                break;
            }
            frame = outbound.recv() => match frame {
                Some(frame) => WsMessage::Text(frame.as_ref().into()),
                None => {
                    let _ = timeout(config.write_timeout, sink.send(WsMessage::Close(None))).await;
                    break;
                }
            },
            _ = keepalive.tick() => WsMessage::Ping(Bytes::new()),
        };

        match timeout(config.write_timeout, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "WebSocket 写入失败");
                break;
            }
            Err(_) => {
                tracing::warn!("WebSocket 写入超时");
                break;
            }
        }
    }

    closed.cancel();
}
