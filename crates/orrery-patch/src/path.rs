//! Parsed patch paths.
//!
//! A patch path is parsed once into tokens and then walked, instead of
//! re-splitting the string at every traversal step. Three addressing styles
//! are accepted: plain fields (`/a/b/c`), slash indices (`/objects/0/mass`),
//! and bracket indices (`/objects[0]/mass`). `-` appends to an array.

/// One step of a parsed patch path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathToken {
    Field(String),
    Index(usize),
    Append,
}

/// Parse a `/`-delimited patch path into tokens.
pub fn parse_path(path: &str) -> Result<Vec<PathToken>, String> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return Err("path is empty".to_string());
    }
    let mut tokens = Vec::new();
    for segment in trimmed.split('/') {
        if segment.is_empty() {
            return Err(format!("empty segment in path '{path}'"));
        }
        parse_segment(segment, path, &mut tokens)?;
    }
    Ok(tokens)
}

/// Parse one segment, expanding bracket suffixes (`objects[0][1]`) into
/// separate index tokens.
fn parse_segment(segment: &str, path: &str, tokens: &mut Vec<PathToken>) -> Result<(), String> {
    if segment == "-" {
        tokens.push(PathToken::Append);
        return Ok(());
    }
    if segment.chars().all(|c| c.is_ascii_digit()) {
        let index = segment
            .parse::<usize>()
            .map_err(|_| format!("index '{segment}' out of range in path '{path}'"))?;
        tokens.push(PathToken::Index(index));
        return Ok(());
    }

    let mut rest = segment;
    if let Some(open) = rest.find('[') {
        let (field, brackets) = rest.split_at(open);
        if field.is_empty() {
            return Err(format!("segment '{segment}' in path '{path}' has no field name"));
        }
        tokens.push(PathToken::Field(field.to_string()));
        rest = brackets;
        while !rest.is_empty() {
            let inner = rest
                .strip_prefix('[')
                .and_then(|r| r.split_once(']'))
                .ok_or_else(|| format!("unbalanced brackets in path '{path}'"))?;
            let (digits, remainder) = inner;
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(format!("non-numeric index '[{digits}]' in path '{path}'"));
            }
            let index = digits
                .parse::<usize>()
                .map_err(|_| format!("index '{digits}' out of range in path '{path}'"))?;
            tokens.push(PathToken::Index(index));
            rest = remainder;
        }
        return Ok(());
    }

    tokens.push(PathToken::Field(segment.to_string()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_fields() {
        assert_eq!(
            parse_path("/contactMaterial/friction").unwrap(),
            vec![
                PathToken::Field("contactMaterial".to_string()),
                PathToken::Field("friction".to_string()),
            ]
        );
    }

    #[test]
    fn slash_index() {
        assert_eq!(
            parse_path("/objects/0/mass").unwrap(),
            vec![
                PathToken::Field("objects".to_string()),
                PathToken::Index(0),
                PathToken::Field("mass".to_string()),
            ]
        );
    }

    #[test]
    fn bracket_index() {
        assert_eq!(
            parse_path("/objects[2]/mass").unwrap(),
            vec![
                PathToken::Field("objects".to_string()),
                PathToken::Index(2),
                PathToken::Field("mass".to_string()),
            ]
        );
    }

    #[test]
    fn bracket_and_slash_index_are_equivalent() {
        assert_eq!(
            parse_path("/objects[1]/color").unwrap(),
            parse_path("/objects/1/color").unwrap()
        );
    }

    #[test]
    fn chained_brackets() {
        assert_eq!(
            parse_path("/grid[1][2]").unwrap(),
            vec![
                PathToken::Field("grid".to_string()),
                PathToken::Index(1),
                PathToken::Index(2),
            ]
        );
    }

    #[test]
    fn append_token() {
        assert_eq!(
            parse_path("/objects/-").unwrap(),
            vec![PathToken::Field("objects".to_string()), PathToken::Append]
        );
    }

    #[test]
    fn rejects_empty_paths() {
        assert!(parse_path("").is_err());
        assert!(parse_path("/").is_err());
        assert!(parse_path("/objects//mass").is_err());
    }

    #[test]
    fn rejects_malformed_brackets() {
        assert!(parse_path("/objects[2/mass").is_err());
        assert!(parse_path("/objects[x]/mass").is_err());
        assert!(parse_path("/objects[]/mass").is_err());
    }
}
