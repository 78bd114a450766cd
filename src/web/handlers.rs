use std::convert::Infallible;

use actix_web::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use actix_web::{web, HttpResponse, Responder};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use log::{error, info};
use serde_json::json;
use tera::Context;

use crate::error::ApiError;
use crate::sse;
use crate::web::relay::EventStream;
use crate::web::validate::{validate_body, BODY_TOO_LARGE, MAX_BODY_BYTES};
use crate::web::AppState;

// Index page handler
pub async fn index(data: web::Data<AppState>) -> impl Responder {
    let mut context = Context::new();
    context.insert("model", &data.relay.config().model);
    match data.tera.render("index.html", &context) {
        Ok(html) => HttpResponse::Ok().content_type("text/html").body(html),
        Err(e) => {
            error!("Template error: {}", e);
            HttpResponse::InternalServerError().body("Template error")
        }
    }
}

// Health check endpoint
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

// Chat API endpoint: validate, then stream the reply as SSE.
pub async fn chat(data: web::Data<AppState>, payload: web::Payload) -> Result<HttpResponse, ApiError> {
    let body = read_body(payload).await?;
    let conversation = validate_body(&body).map_err(|e| {
        info!("Rejected chat request: {}", e.message);
        e
    })?;

    info!(
        "Chat request with {} messages",
        conversation.messages().len()
    );

    let events = data.relay.open(conversation).await?;

    Ok(HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, "text/event-stream"))
        .insert_header((CACHE_CONTROL, "no-cache"))
        .streaming(sse_body(events)))
}

/// Collect the request body, refusing it as soon as it outgrows the limit.
async fn read_body(mut payload: web::Payload) -> Result<BytesMut, ApiError> {
    let mut body = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| ApiError::bad_request(format!("Could not read request body: {}", e)))?;
        if body.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(ApiError::bad_request(BODY_TOO_LARGE));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Encode events as SSE frames, closed by a `[DONE]` frame.
fn sse_body(events: EventStream) -> impl futures::Stream<Item = Result<Bytes, Infallible>> {
    events
        .map(|event| sse::frame(&event.to_json()))
        .chain(stream::once(async { sse::frame(sse::DONE) }))
        .map(Ok)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{rt, test, App, HttpServer};
    use serde_json::Value;
    use tera::Tera;

    use super::*;
    use crate::config::ChatConfig;
    use crate::error::{ErrorBody, ErrorKind};
    use crate::client::{ChatSession, ClientError, HttpTransport, Status, Submission};
    use crate::model::scripted::{ScriptedModel, Step};
    use crate::web::models::StreamEvent;
    use crate::web::relay::Relay;
    use crate::web::{routes, validate};

    fn state(model: Arc<ScriptedModel>) -> web::Data<AppState> {
        let mut tera = Tera::default();
        tera.add_raw_template("index.html", "<title>{{ model }}</title>")
            .unwrap();
        web::Data::new(AppState {
            tera,
            relay: Relay::new(model, Arc::new(ChatConfig::default())),
        })
    }

    fn events_of(body: &[u8]) -> Vec<StreamEvent> {
        let text = std::str::from_utf8(body).unwrap();
        let frames: Vec<&str> = text
            .split("\n\n")
            .filter(|frame| !frame.is_empty())
            .map(|frame| frame.strip_prefix("data: ").unwrap())
            .collect();
        assert_eq!(frames.last(), Some(&sse::DONE));
        frames[..frames.len() - 1]
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap())
            .collect()
    }

    #[actix_web::test]
    async fn streams_reply_for_valid_conversation() {
        let model = Arc::new(ScriptedModel::replying(&["Hello", ", ", "world"]));
        let app = test::init_service(
            App::new()
                .app_data(state(model.clone()))
                .configure(routes::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/chat")
            .set_json(json!({ "messages": [{ "role": "user", "text": "Hi" }] }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(
            resp.headers().get(CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        let events = events_of(&test::read_body(resp).await);
        let text: String = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::TextDelta { delta } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello, world");
        assert_eq!(events.last(), Some(&StreamEvent::Finish));
        assert_eq!(model.calls(), 1);
    }

    #[actix_web::test]
    async fn empty_conversation_is_rejected_without_calling_provider() {
        let model = Arc::new(ScriptedModel::replying(&["unused"]));
        let app = test::init_service(
            App::new()
                .app_data(state(model.clone()))
                .configure(routes::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/chat")
            .set_json(json!({ "messages": [] }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status().as_u16(), 400);
        let body: ErrorBody = test::read_body_json(resp).await;
        assert_eq!(
            body,
            ErrorBody {
                error: ErrorKind::BadRequest,
                message: "Messages array is required and must not be empty".to_string(),
            }
        );
        assert_eq!(model.calls(), 0);
    }

    #[actix_web::test]
    async fn conversation_without_user_message_is_rejected() {
        let model = Arc::new(ScriptedModel::replying(&["unused"]));
        let app = test::init_service(
            App::new()
                .app_data(state(model.clone()))
                .configure(routes::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/chat")
            .set_json(json!({ "messages": [{ "role": "assistant", "text": "hello" }] }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status().as_u16(), 400);
        let body: ErrorBody = test::read_body_json(resp).await;
        assert_eq!(body.message, validate::NO_USER_MESSAGE);
        assert_eq!(model.calls(), 0);
    }

    #[actix_web::test]
    async fn provider_auth_failure_maps_to_401() {
        let app = test::init_service(
            App::new()
                .app_data(state(Arc::new(ScriptedModel::refusing(401))))
                .configure(routes::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/chat")
            .set_json(json!({ "messages": [{ "role": "user", "text": "Hi" }] }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status().as_u16(), 401);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Unauthorized");
        assert_eq!(body["message"], "Invalid API key");
    }

    #[actix_web::test]
    async fn invalid_json_is_a_bad_request() {
        let app = test::init_service(
            App::new()
                .app_data(state(Arc::new(ScriptedModel::replying(&[]))))
                .configure(routes::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/chat")
            .insert_header((CONTENT_TYPE, "application/json"))
            .set_payload("{\"messages\":")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status().as_u16(), 400);
        let body: ErrorBody = test::read_body_json(resp).await;
        assert_eq!(body.message, validate::INVALID_JSON);
    }

    #[actix_web::test]
    async fn index_and_health() {
        let app = test::init_service(
            App::new()
                .app_data(state(Arc::new(ScriptedModel::replying(&[]))))
                .configure(routes::configure),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert!(resp.status().is_success());
        let html = test::read_body(resp).await;
        assert_eq!(&html[..], b"<title>gpt-4o-mini</title>");

        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[actix_web::test]
    async fn oversized_body_is_a_json_bad_request() {
        let model = Arc::new(ScriptedModel::replying(&["unused"]));
        let app = test::init_service(
            App::new()
                .app_data(state(model.clone()))
                .configure(routes::configure),
        )
        .await;

        let text = "a".repeat(2 * MAX_BODY_BYTES);
        let req = test::TestRequest::post()
            .uri("/chat")
            .set_json(json!({ "messages": [{ "role": "user", "text": text }] }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status().as_u16(), 400);
        let body: ErrorBody = test::read_body_json(resp).await;
        assert_eq!(
            body,
            ErrorBody {
                error: ErrorKind::BadRequest,
                message: BODY_TOO_LARGE.to_string(),
            }
        );
        assert_eq!(model.calls(), 0);
    }

    #[actix_web::test]
    async fn mid_stream_failure_is_an_error_frame_before_done() {
        let model = Arc::new(ScriptedModel::from_steps(vec![
            Step::Text("Hel".to_string()),
            Step::Fail(429),
        ]));
        let app = test::init_service(
            App::new()
                .app_data(state(model))
                .configure(routes::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/chat")
            .set_json(json!({ "messages": [{ "role": "user", "text": "Hi" }] }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        // Headers were already committed, so the failure travels in-band.
        assert_eq!(resp.status().as_u16(), 200);
        let events = events_of(&test::read_body(resp).await);
        assert!(matches!(events.first(), Some(StreamEvent::Start { .. })));
        assert_eq!(
            events[1..],
            [
                StreamEvent::TextDelta {
                    delta: "Hel".to_string()
                },
                StreamEvent::Error {
                    error: ErrorKind::TooManyRequests,
                    message: "Rate limit exceeded".to_string(),
                },
            ]
        );
    }

    /// Serve the app on an ephemeral local port for a real HTTP client.
    fn serve(model: Arc<ScriptedModel>) -> (String, actix_web::dev::ServerHandle) {
        let data = state(model);
        let server = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .configure(routes::configure)
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        rt::spawn(server);
        (format!("http://{}", addr), handle)
    }

    #[actix_web::test]
    async fn session_completes_against_a_running_server() {
        let (url, server) = serve(Arc::new(ScriptedModel::replying(&["Hello", ", ", "world"])));
        let session = ChatSession::new(HttpTransport::new(&url));

        assert_eq!(session.send("Hi").await.unwrap(), Submission::Completed);

        let view = session.snapshot();
        assert_eq!(view.status, Status::Ready);
        assert_eq!(view.error, None);
        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.messages[1].text(), "Hello, world");
        server.stop(false).await;
    }

    #[actix_web::test]
    async fn session_sees_rejections_and_aborts_from_a_running_server() {
        let (url, server) = serve(Arc::new(ScriptedModel::refusing(401)));
        let session = ChatSession::new(HttpTransport::new(&url));
        assert_eq!(
            session.send("Hi").await.unwrap_err(),
            ClientError::Rejected {
                status: 401,
                kind: ErrorKind::Unauthorized,
                message: "Invalid API key".to_string(),
            }
        );
        server.stop(false).await;

        let (url, server) = serve(Arc::new(ScriptedModel::from_steps(vec![
            Step::Text("partial".to_string()),
            Step::Fail(429),
        ])));
        let session = ChatSession::new(HttpTransport::new(&url));
        assert_eq!(
            session.send("Hi").await.unwrap_err(),
            ClientError::Aborted {
                kind: ErrorKind::TooManyRequests,
                message: "Rate limit exceeded".to_string(),
            }
        );
        let view = session.snapshot();
        assert_eq!(view.status, Status::Error);
        assert_eq!(view.messages[1].text(), "partial");
        server.stop(false).await;
    }
}
