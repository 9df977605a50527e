use async_stream::try_stream;
use color_eyre::{Result, eyre::Context};
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use super::{LLM, LLMStream, OutputMessage, Request, ResponseFragment, Role};
use crate::openai_error::{ErrorBody, OpenAIApiError, error_from_response};

pub const DEFAULT_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone)]
pub struct OpenAIChat {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAIChat {
    pub fn new(api_key: String, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

impl LLM for OpenAIChat {
    fn send_request_stream(&mut self, req: Request) -> LLMStream<'_> {
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let url = self.base_url.clone();
        let body = build_request_body(self.model.clone(), req);

        Box::pin(try_stream! {
            let request = serde_json::to_string(&body)?;
            debug!("OpenAI request: {request}");

            let res = client
                .post(&url)
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await
                .context("initial response")?;

            if !res.status().is_success() {
                Err::<(), _>(error_from_response(res).await)?;
            } else {
                debug!("OpenAI response:\n{res:#?}");
                let mut stream = res.bytes_stream();
                let mut lines = LineBuffer::default();
                let mut processor = ChunkProcessor::default();

                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.context("reading completion stream")?;
                    for line in lines.push(&chunk)? {
                        if let Some(fragment) = processor.process_line(&line)? {
                            yield fragment;
                        }
                    }
                    if processor.done {
                        return;
                    }
                }

                if let Some(line) = lines.finish()? {
                    if let Some(fragment) = processor.process_line(&line)? {
                        yield fragment;
                    }
                }

                if !processor.done {
                    warn!("Completion stream ended without [DONE]");
                    yield processor.complete();
                }
            }
        })
    }

    fn clone(&self) -> Box<dyn LLM + Send + 'static> {
        Box::new(Clone::clone(self))
    }
}

fn build_request_body(model: String, req: Request) -> OpenAIChatRequest {
    let mut messages = Vec::new();

    if let Some(system) = req.system {
        messages.push(OpenAIMessage {
            role: "system",
            content: system,
        });
    }

    for msg in req.messages {
        messages.push(OpenAIMessage {
            role: match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: msg.content,
        });
    }

    OpenAIChatRequest {
        model,
        messages,
        stream: true,
        temperature: req.temperature,
        stream_options: StreamOptions {
            include_usage: true,
        },
    }
}

/// Splits a byte stream into lines, keeping incomplete lines until the rest arrives
#[derive(Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.bytes.extend_from_slice(chunk);
        let mut lines = vec![];
        while let Some(pos) = self.bytes.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.bytes.drain(..=pos).collect();
            let line = String::from_utf8(line).context("stream line to utf-8")?;
            lines.push(line.trim_end().to_string());
        }
        Ok(lines)
    }

    fn finish(&mut self) -> Result<Option<String>> {
        if self.bytes.is_empty() {
            return Ok(None);
        }
        let rest = String::from_utf8(std::mem::take(&mut self.bytes))
            .context("stream line to utf-8")?;
        Ok(Some(rest.trim_end().to_string()))
    }
}

/// Turns `data:` lines of the event stream into response fragments
#[derive(Default)]
struct ChunkProcessor {
    full_text: String,
    input_tokens: usize,
    output_tokens: usize,
    done: bool,
}

impl ChunkProcessor {
    fn process_line(&mut self, line: &str) -> Result<Option<ResponseFragment>> {
        let Some(data) = line.trim().strip_prefix("data:").map(str::trim_start) else {
            return Ok(None);
        };

        if data == "[DONE]" {
            self.done = true;
            return Ok(Some(self.complete()));
        }

        let event: OpenAIStreamChunk = serde_json::from_str(data)
            .with_context(|| format!("parsing stream chunk: {data}"))?;

        if let Some(error) = event.error {
            return Err(OpenAIApiError::from_stream_error(error).into());
        }

        if let Some(usage) = event.usage {
            self.input_tokens = usage.prompt_tokens;
            self.output_tokens = usage.completion_tokens;
        }

        let content = event
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty());

        Ok(content.map(|content| {
            self.full_text.push_str(&content);
            ResponseFragment::TextDelta(content)
        }))
    }

    fn complete(&self) -> ResponseFragment {
        ResponseFragment::MessageComplete(OutputMessage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            text: self.full_text.clone(),
        })
    }
}

//
// ===== OpenAI wire types =====
//

#[derive(Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    temperature: f32,
    stream_options: StreamOptions,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct OpenAIStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Deserialize, Debug)]
struct OpenAIStreamChoice {
    delta: OpenAIDelta,
}

#[derive(Deserialize, Debug)]
struct OpenAIDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[cfg(test)]
mod test {
    use expect_test::expect;

    use super::*;
    use crate::llm::InputMessage;

    #[test]
    fn request_serialization() {
        let body = build_request_body(
            "model".into(),
            Request {
                system: Some("Be terse".into()),
                messages: vec![InputMessage::user("Some user msg".into())],
                temperature: 1.0,
            },
        );

        let expect = expect![[r#"{"model":"model","messages":[{"role":"system","content":"Be terse"},{"role":"user","content":"Some user msg"}],"stream":true,"temperature":1.0,"stream_options":{"include_usage":true}}"#]];
        expect.assert_eq(&serde_json::to_string(&body).unwrap());
    }

    #[test]
    fn lines_split_across_chunks() {
        let mut buffer = LineBuffer::default();
        let sse = b"data: {\"choices\":[{\"delta\":{\"content\":\"[{\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"}]\"}}]}\n\ndata: [DONE]";

        let mut lines = vec![];
        for slice in sse.chunks(7) {
            lines.extend(buffer.push(slice).unwrap());
        }
        lines.extend(buffer.finish().unwrap());

        let mut processor = ChunkProcessor::default();
        let mut deltas = vec![];
        let mut complete = None;
        for line in lines {
            match processor.process_line(&line).unwrap() {
                Some(ResponseFragment::TextDelta(t)) => deltas.push(t),
                Some(ResponseFragment::MessageComplete(m)) => complete = Some(m),
                None => {}
            }
        }

        assert_eq!(deltas, vec!["[{".to_string(), "}]".to_string()]);
        assert!(processor.done);
        assert_eq!(complete.unwrap().text, "[{}]");
    }

    #[test]
    fn usage_chunk_is_recorded() {
        let mut processor = ChunkProcessor::default();
        let line = r#"data: {"choices":[],"usage":{"prompt_tokens":42,"completion_tokens":7,"total_tokens":49}}"#;
        assert!(processor.process_line(line).unwrap().is_none());

        let Some(ResponseFragment::MessageComplete(msg)) =
            processor.process_line("data: [DONE]").unwrap()
        else {
            panic!("expected completion");
        };
        assert_eq!((msg.input_tokens, msg.output_tokens), (42, 7));
    }

    #[test]
    fn error_event_fails() {
        let mut processor = ChunkProcessor::default();
        let line = r#"data: {"error":{"message":"The server had an error","type":"server_error"}}"#;
        let err = processor.process_line(line).unwrap_err();
        assert!(err.to_string().contains("The server had an error"));
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let mut processor = ChunkProcessor::default();
        assert!(processor.process_line(": keep-alive").unwrap().is_none());
        assert!(processor.process_line("").unwrap().is_none());
    }
}
