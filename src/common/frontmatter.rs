use serde::de::DeserializeOwned;

const DELIMITER: &str = "---";

pub struct ParsedDocument<F> {
    pub frontmatter: F,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrontmatterError {
    #[error("frontmatter not properly terminated with ---")]
    Unterminated,

    #[error("failed to parse frontmatter: {0}")]
    Yaml(String),
}

pub fn has_frontmatter(content: &str) -> bool {
    content
        .lines()
        .next()
        .is_some_and(|line| line.trim_end() == DELIMITER)
}

/// Splits a `---` delimited YAML header from the markdown body.
///
/// The closing delimiter must sit on its own line; `---` inside a value does
/// not terminate the block. An empty header yields `F::default()`.
pub fn parse_frontmatter<F: DeserializeOwned + Default>(
    content: &str,
) -> Result<ParsedDocument<F>, FrontmatterError> {
    let mut lines = content.split_inclusive('\n');
    match lines.next() {
        Some(first) if first.trim_end() == DELIMITER => {}
        _ => {
            return Ok(ParsedDocument {
                frontmatter: F::default(),
                body: content.trim().to_string(),
            });
        }
    }

    let mut header = String::new();
    let mut offset = content.split_inclusive('\n').next().map_or(0, str::len);
    let mut terminated = false;
    for line in lines {
        offset += line.len();
        if line.trim_end() == DELIMITER {
            terminated = true;
            break;
        }
        header.push_str(line);
    }

    if !terminated {
        return Err(FrontmatterError::Unterminated);
    }

    let frontmatter = if header.trim().is_empty() {
        F::default()
    } else {
        serde_yaml_bw::from_str(&header).map_err(|e| FrontmatterError::Yaml(e.to_string()))?
    };

    Ok(ParsedDocument {
        frontmatter,
        body: content[offset..].trim().to_string(),
    })
}
