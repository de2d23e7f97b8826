//! Checks a viewer's submission against its model and turns it into the
//! parameters a generation runs with.

use tunesmith_core::protocol::SubmitRequest;
use tunesmith_core::{GenerationParams, TuneError};
use tunesmith_repertoire::{HeaderKind, ModelRegistry};

pub const MAX_SEED: u64 = 999_999;
pub const MAX_TEMPERATURE: f64 = 10.0;

pub fn compose_params(
    registry: &ModelRegistry,
    request: &SubmitRequest,
) -> Result<GenerationParams, TuneError> {
    let model = registry.load(&request.model)?;

    if request.seed > MAX_SEED {
        return Err(TuneError::Validation(format!(
            "seed {} is outside 0..={}",
            request.seed, MAX_SEED
        )));
    }
    if !(request.temperature > 0.0 && request.temperature <= MAX_TEMPERATURE) {
        return Err(TuneError::Validation(format!(
            "temperature {} is outside (0, {}]",
            request.temperature, MAX_TEMPERATURE
        )));
    }
    if !model.accepts_tokens(&request.priming_tokens) {
        let foreign: Vec<&str> = request
            .priming_tokens
            .iter()
            .map(String::as_str)
            .filter(|t| !t.is_empty() && !model.vocabulary().contains(*t))
            .collect();
        return Err(TuneError::Validation(format!(
            "tokens not known to model {}: {}",
            model.id,
            foreign.join(" ")
        )));
    }

    let mut priming_tokens = Vec::new();
    // Without a meter or key the submission is priming tokens only and the
    // headers, if any, are in the tokens themselves.
    if !request.meter.is_empty() || !request.key.is_empty() {
        let unit_length = if request.unit_length.is_empty() && model.has_frequency_table() {
            model.sample_unit_length(&request.meter, request.seed)
        } else {
            request.unit_length.clone()
        };

        for (kind, token) in [
            (HeaderKind::Meter, &request.meter),
            (HeaderKind::Key, &request.key),
            (HeaderKind::UnitLength, &unit_length),
        ] {
            if !model.accepts_header(kind, token) {
                return Err(TuneError::Validation(format!(
                    "{} {:?} is not valid for model {}",
                    kind, token, model.id
                )));
            }
            if token.is_empty() {
                continue;
            }
            // Hand the engine the model's own spelling of the header.
            if model.header_tokens(kind).contains(token) {
                priming_tokens.push(token.clone());
            } else {
                priming_tokens.push(model.rules.inline(token));
            }
        }
    }
    priming_tokens.extend(
        request
            .priming_tokens
            .iter()
            .filter(|t| !t.is_empty())
            .cloned(),
    );

    Ok(GenerationParams {
        model: model.id.clone(),
        seed: request.seed,
        temperature: request.temperature,
        priming_tokens,
    })
}
