//! `tkt ask`: retrieve context for a question and generate an answer.

use anyhow::{bail, Context, Result};
use tracing::warn;

use crate::config::Config;
use crate::generate::{create_generator, UNAVAILABLE_MESSAGE};
use crate::search::Retriever;

pub async fn run_ask(config: &Config, question: &str, show_context: bool) -> Result<()> {
    if question.trim().is_empty() {
        bail!("Question must not be empty.");
    }
    let generator = create_generator(&config.generation)
        .context("Failed to set up answer generation")?
        .context("Answer generation is disabled. Set [generation] provider in config.")?;

    let params = config.retrieval.search_params();
    let retriever = Retriever::open(config).await?;
    let (_, context) = retriever
        .context(question, &params)
        .await
        .context("Context retrieval failed")?;
    retriever.close().await;

    if show_context {
        println!("Context:\n{}\n", if context.is_empty() { "(none)" } else { context.as_str() });
    }

    match generator.answer(&context, question).await {
        Ok(answer) => println!("{}", answer),
        Err(e) => {
            warn!(model = generator.model(), error = %e, "answer generation failed");
            println!("{}", UNAVAILABLE_MESSAGE);
        }
    }
    Ok(())
}
