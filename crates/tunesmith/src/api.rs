use crate::service::TuneService;
use crate::ws;
use serde::{Deserialize, Serialize};
use tide::{Request, Response, StatusCode};
use tide_websockets::WebSocket;
use tunesmith_core::protocol::ServerMessage;
use tunesmith_core::TuneId;
use tunesmith_repertoire::{HeaderKind, ModelDescriptor};

#[derive(Serialize, Deserialize, Clone)]
pub struct ModelResponse {
    pub id: String,
    pub display_name: String,
    pub rank: i32,
    pub meters: Vec<String>,
    pub keys: Vec<String>,
    pub unit_lengths: Vec<String>,
}

impl From<&ModelDescriptor> for ModelResponse {
    fn from(model: &ModelDescriptor) -> Self {
        Self {
            id: model.id.clone(),
            display_name: model.display_name.clone(),
            rank: model.rank,
            meters: model.header_tokens(HeaderKind::Meter).to_vec(),
            keys: model.header_tokens(HeaderKind::Key).to_vec(),
            unit_lengths: model.header_tokens(HeaderKind::UnitLength).to_vec(),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct ModelListResponse {
    pub object: String,
    pub models: Vec<ModelResponse>,
    pub preferred: Option<String>,
}

/// HTTP routes plus the `/ws` upgrade.
pub fn app(service: TuneService) -> tide::Server<TuneService> {
    let mut app = tide::with_state(service);
    app.at("/models").get(list_models);
    app.at("/tunes/:id").get(get_tune);
    app.at("/ws").get(WebSocket::new(ws::serve_connection));
    app
}

pub async fn list_models(req: Request<TuneService>) -> tide::Result {
    let models: Vec<ModelResponse> = req
        .state()
        .registry()
        .list()
        .iter()
        .map(|m| ModelResponse::from(m.as_ref()))
        .collect();
    // Lowest rank is the one to offer first.
    let preferred = models.first().map(|m| m.id.clone());

    json(
        StatusCode::Ok,
        &ModelListResponse {
            object: "list".to_string(),
            models,
            preferred,
        },
    )
}

/// The out-of-band read: whatever the record holds right now.
pub async fn get_tune(req: Request<TuneService>) -> tide::Result {
    let Ok(id) = req.param("id")?.parse::<TuneId>() else {
        return json(
            StatusCode::BadRequest,
            &ServerMessage::Rejected {
                reason: "tune id must be a non-negative integer".to_string(),
            },
        );
    };
    match req.state().snapshot(id) {
        Ok(tune) => json(StatusCode::Ok, &tune),
        Err(e) if e.is_not_found() => {
            json(StatusCode::NotFound, &ServerMessage::NotFound { tune_id: id })
        }
        Err(e) => Err(tide::Error::from_str(StatusCode::InternalServerError, e.to_string())),
    }
}

fn json(status: StatusCode, body: &impl Serialize) -> tide::Result {
    Ok(Response::builder(status)
        .content_type(tide::http::mime::JSON)
        .body(serde_json::to_string(body)?)
        .build())
}
