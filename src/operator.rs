//! Operator decisions between items.

use crate::source::Item;
use async_trait::async_trait;
use std::io;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};

/// What to do with the next item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Skip,
    Abort,
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "n" | "next" | "c" | "continue" | "y" | "yes" => Ok(Decision::Continue),
            "s" | "skip" => Ok(Decision::Skip),
            "0" | "q" | "quit" | "exit" | "abort" => Ok(Decision::Abort),
            other => Err(format!("unrecognized response '{}'", other)),
        }
    }
}

/// Source of operator input.
#[async_trait]
pub trait OperatorChannel: Send {
    /// Block until the operator decides about `item`.
    async fn decide(&mut self, item: &Item) -> io::Result<Decision>;

    /// Yes/no question. Anything other than an explicit yes is a no.
    async fn confirm(&mut self, question: &str) -> io::Result<bool>;
}

/// Prompt/response over a line-oriented reader and writer.
pub struct LineOperator<R, W> {
    reader: R,
    writer: W,
}

impl LineOperator<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> LineOperator<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    async fn prompt(&mut self, text: &str) -> io::Result<Option<String>> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.flush().await?;

        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

#[async_trait]
impl<R, W> OperatorChannel for LineOperator<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn decide(&mut self, item: &Item) -> io::Result<Decision> {
        let text = format!(
            "Next: {}\n[n]ext to continue, [s]kip, [q]uit: ",
            item.id
        );

        loop {
            let Some(answer) = self.prompt(&text).await? else {
                log::warn!("Operator input closed, aborting");
                return Ok(Decision::Abort);
            };

            match answer.parse::<Decision>() {
                Ok(decision) => return Ok(decision),
                Err(e) => {
                    self.writer.write_all(format!("{}\n", e).as_bytes()).await?;
                }
            }
        }
    }

    async fn confirm(&mut self, question: &str) -> io::Result<bool> {
        let text = format!("{} [y/n]: ", question);

        loop {
            let Some(answer) = self.prompt(&text).await? else {
                return Ok(false);
            };

            match answer.to_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operator(input: &str) -> LineOperator<&[u8], Vec<u8>> {
        LineOperator::new(input.as_bytes(), Vec::new())
    }

    #[test]
    fn test_decision_tokens() {
        for token in ["n", "NEXT", "c", "continue", "Y", "yes"] {
            assert_eq!(token.parse::<Decision>(), Ok(Decision::Continue), "{}", token);
        }
        for token in ["s", "Skip"] {
            assert_eq!(token.parse::<Decision>(), Ok(Decision::Skip), "{}", token);
        }
        for token in ["0", "q", "QUIT", "exit", "abort"] {
            assert_eq!(token.parse::<Decision>(), Ok(Decision::Abort), "{}", token);
        }
        assert!("maybe".parse::<Decision>().is_err());
        assert!("".parse::<Decision>().is_err());
    }

    #[tokio::test]
    async fn test_invalid_input_reprompts() {
        let mut op = operator("what\n\nskip\n");
        let decision = op.decide(&Item::new("b.exe")).await.unwrap();
        assert_eq!(decision, Decision::Skip);

        let output = String::from_utf8(op.into_writer()).unwrap();
        assert_eq!(output.matches("Next: b.exe").count(), 3);
        assert!(output.contains("unrecognized response 'what'"));
    }

    #[tokio::test]
    async fn test_end_of_input_aborts() {
        let mut op = operator("");
        assert_eq!(op.decide(&Item::new("a")).await.unwrap(), Decision::Abort);
    }

    #[tokio::test]
    async fn test_confirm() {
        assert!(operator("maybe\nYES\n").confirm("Reboot now?").await.unwrap());
        assert!(!operator("n\n").confirm("Reboot now?").await.unwrap());
        assert!(!operator("").confirm("Reboot now?").await.unwrap());
    }
}
