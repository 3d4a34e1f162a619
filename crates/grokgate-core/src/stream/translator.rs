//! Converts one upstream event into the gateway's output vocabulary.
//!
//! Each response family reads a different combination of event markers
//! (`isThinking`, `messageStepId`, `messageTag`, `webSearchResults`).
//! Thinking segments are bracketed with `<think>`/`</think>` so clients
//! can fold them away.

use serde_json::Value;

use crate::models::ResponseFamily;

#[derive(Debug, Clone, Copy)]
pub struct TranslatorOptions {
    pub show_thinking: bool,
    pub show_search_results: bool,
}

/// Per-response translator state. One instance per in-flight response;
/// never shared across concurrent requests.
#[derive(Debug, Default)]
pub struct ResponseContext {
    /// Inside a thinking segment (the opening marker has been emitted).
    thinking: bool,
    /// The response declared itself an image generation.
    image_gen: bool,
    /// An image artifact was already emitted; later cached responses for
    /// the same generation are ignored.
    image_emitted: bool,
}

impl ResponseContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_image_emitted(&mut self) {
        self.image_emitted = true;
    }
}

/// What one event contributes to the response.
#[derive(Debug, Default, PartialEq)]
pub struct StepOutput {
    pub token: Option<String>,
    /// Asset path of a generated image, to be fetched and re-hosted.
    pub image_url: Option<String>,
}

impl StepOutput {
    fn token(text: String) -> Self {
        Self { token: Some(text), image_url: None }
    }

    fn none() -> Self {
        Self::default()
    }
}

fn event_token(event: &Value) -> &str {
    event.get("token").and_then(Value::as_str).unwrap_or("")
}

fn flag(event: &Value, key: &str) -> bool {
    match event.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn message_tag<'a>(event: &'a Value) -> &'a str {
    event.get("messageTag").and_then(Value::as_str).unwrap_or("")
}

/// Renders web-search results as collapsible blocks under the answer.
pub fn format_search_results(search: &Value) -> String {
    let Some(results) = search.get("results").and_then(Value::as_array) else {
        return String::new();
    };
    let blocks: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(index, result)| {
            let title = result.get("title").and_then(Value::as_str).unwrap_or("Untitled");
            let url = result.get("url").and_then(Value::as_str).unwrap_or("#");
            let preview = result.get("preview").and_then(Value::as_str).unwrap_or("No preview");
            format!(
                "\r\n<details><summary>Source[{index}]: {title}</summary>\r\n{preview}\r\n\n[Link]({url})\r\n</details>"
            )
        })
        .collect();
    blocks.join("\n\n")
}

/// Translates one upstream `response` event for the given family.
pub fn translate(
    ctx: &mut ResponseContext,
    family: ResponseFamily,
    event: &Value,
    opts: TranslatorOptions,
) -> StepOutput {
    if flag(event, "doImgGen") || event.get("imageAttachmentInfo").is_some() {
        ctx.image_gen = true;
    }
    if ctx.image_gen {
        if let Some(cached) = event.get("cachedImageGenerationResponse") {
            if !ctx.image_emitted {
                if let Some(url) = cached.get("imageUrl").and_then(Value::as_str) {
                    return StepOutput { token: None, image_url: Some(url.to_string()) };
                }
            }
        }
        return StepOutput::none();
    }

    match family {
        ResponseFamily::Plain => StepOutput::token(event_token(event).to_string()),
        // Image generations only ever emit the artifact; progress text from
        // upstream is swallowed.
        ResponseFamily::ImageGen => StepOutput::none(),
        ResponseFamily::PlainFiltered => {
            if flag(event, "isThinking") {
                StepOutput::none()
            } else {
                StepOutput::token(event_token(event).to_string())
            }
        }
        ResponseFamily::Search => {
            if let Some(results) = event.get("webSearchResults") {
                if opts.show_search_results {
                    return StepOutput::token(format!(
                        "\r\n<think>{}</think>\r\n",
                        format_search_results(results)
                    ));
                }
            }
            StepOutput::token(event_token(event).to_string())
        }
        ResponseFamily::DeepSearch => {
            let stepping = flag(event, "messageStepId");
            if stepping && !opts.show_thinking {
                return StepOutput::none();
            }
            let tag = message_tag(event);
            if stepping && !ctx.thinking {
                ctx.thinking = true;
                StepOutput::token(format!("<think>{}", event_token(event)))
            } else if !stepping && ctx.thinking && tag == "final" {
                ctx.thinking = false;
                StepOutput::token(format!("</think>{}", event_token(event)))
            } else if (stepping && ctx.thinking && tag == "assistant") || tag == "final" {
                StepOutput::token(event_token(event).to_string())
            } else if ctx.thinking
                && event.get("token").and_then(|t| t.get("action")).and_then(Value::as_str)
                    == Some("webSearch")
            {
                let query = event
                    .get("token")
                    .and_then(|t| t.get("action_input"))
                    .and_then(|i| i.get("query"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                StepOutput::token(query.to_string())
            } else if ctx.thinking {
                if let Some(results) = event.get("webSearchResults") {
                    StepOutput::token(format_search_results(results))
                } else {
                    StepOutput::none()
                }
            } else {
                StepOutput::none()
            }
        }
        ResponseFamily::Reasoning => {
            let is_thinking = flag(event, "isThinking");
            if is_thinking && !opts.show_thinking {
                return StepOutput::none();
            }
            if is_thinking && !ctx.thinking {
                ctx.thinking = true;
                StepOutput::token(format!("<think>{}", event_token(event)))
            } else if !is_thinking && ctx.thinking {
                ctx.thinking = false;
                StepOutput::token(format!("</think>{}", event_token(event)))
            } else {
                StepOutput::token(event_token(event).to_string())
            }
        }
        ResponseFamily::ReasoningTagged => {
            let is_thinking = flag(event, "isThinking");
            if is_thinking && !opts.show_thinking {
                return StepOutput::none();
            }
            let tag = message_tag(event);
            if is_thinking && !ctx.thinking && tag == "assistant" {
                ctx.thinking = true;
                StepOutput::token(format!("<think>{}", event_token(event)))
            } else if !is_thinking && ctx.thinking && tag == "final" {
                ctx.thinking = false;
                StepOutput::token(format!("</think>{}", event_token(event)))
            } else {
                StepOutput::token(event_token(event).to_string())
            }
        }
    }
}
