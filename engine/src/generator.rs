use std::{io::Write, time::Duration};

use color_eyre::{Result, eyre::Context};
use indoc::{formatdoc, indoc};
use log::info;
use tokio_stream::StreamExt;

use crate::{
    config::GenerationConfig,
    llm::{InputMessage, LLM, LLMStream, Request, ResponseFragment},
    with_deadline,
};

const SYSTEM_MESSAGE: &str = indoc! {"
    You are a bot that generates arrays of JSON data for mocking applications.

    You will be given a JSON schema. Each key is a key of the objects in the resulting
    JSON file, and its value describes the data to generate for that property.

    Regardless of the count, generate the data as an array of objects.

    Do not provide any explanation or additional information. Output only the generated
    JSON data, ready to be saved to a JSON file, without formatting it as a markdown
    code block.
"};

pub fn construct_request(config: &GenerationConfig, temperature: f32) -> Result<Request> {
    let schema = config.schema.to_json()?;
    let context = tidy(&config.context);
    let count = config.count;

    let user_message = formatdoc! {r#"
        Use the following data to generate a mock JSON file that adheres to the schema:

        """{schema}"""

        {context}

        Provide a JSON file with {count} records.
    "#};

    Ok(Request {
        system: Some(SYSTEM_MESSAGE.into()),
        messages: vec![InputMessage::user(user_message)],
        temperature,
    })
}

/// Streams the completion for `req`, mirroring every fragment to `mirror` as it arrives.
/// Returns the fragments joined in arrival order.
pub async fn generate_mock_data(
    llm: &mut (dyn LLM + Send),
    req: Request,
    mirror: &mut (dyn Write + Send),
    deadline: Option<Duration>,
) -> Result<String> {
    let stream = llm.send_request_stream(req);
    with_deadline(deadline, "text generation", collect_text(stream, mirror)).await
}

async fn collect_text(mut stream: LLMStream<'_>, mirror: &mut (dyn Write + Send)) -> Result<String> {
    let mut text = String::new();
    while let Some(fragment) = stream.try_next().await? {
        match fragment {
            ResponseFragment::TextDelta(delta) => {
                mirror
                    .write_all(delta.as_bytes())
                    .and_then(|_| mirror.flush())
                    .context("mirroring generated text")?;
                text.push_str(&delta);
            }
            ResponseFragment::MessageComplete(msg) => {
                info!(
                    "Generation complete. input tokens: {}, output tokens: {}",
                    msg.input_tokens, msg.output_tokens
                );
            }
        }
    }
    Ok(text)
}

/// Strips the indentation config files tend to carry
pub(crate) fn tidy(text: &str) -> String {
    text.trim()
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
}
