use evoloop::engine::acquisition::AcquisitionPolicy;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error(
        "Invalid policy '{0}'. Expected 'exploit', 'ucb[:LAMBDA]' or 'diverse[:MIN_DISTANCE]' (e.g., 'ucb:2.0')."
    )]
    InvalidPolicy(String),

    #[error("Invalid number '{value}' in '{input}'.")]
    InvalidNumber { input: String, value: String },

    #[error("Invalid position range '{0}'. Expected 'START-END' with START <= END.")]
    InvalidRange(String),

    #[error("Invalid --set format: '{0}'. Expected KEY=VALUE.")]
    InvalidAssignment(String),
}

pub const DEFAULT_UCB_LAMBDA: f64 = 1.0;
pub const DEFAULT_MIN_DISTANCE: usize = 2;

fn number<T: std::str::FromStr>(input: &str, value: &str) -> Result<T, ParseError> {
    value.trim().parse().map_err(|_| ParseError::InvalidNumber {
        input: input.to_string(),
        value: value.to_string(),
    })
}

/// Parses `exploit`, `ucb`, `ucb:LAMBDA`, `diverse` or `diverse:MIN_DISTANCE`.
pub fn parse_policy(input: &str) -> Result<AcquisitionPolicy, ParseError> {
    let trimmed = input.trim();
    let (name, arg) = match trimmed.split_once(':') {
        Some((name, arg)) => (name, Some(arg)),
        None => (trimmed, None),
    };
    match (name.to_ascii_lowercase().as_str(), arg) {
        ("exploit" | "greedy", None) => Ok(AcquisitionPolicy::Exploit),
        ("ucb", arg) => Ok(AcquisitionPolicy::UpperConfidenceBound {
            lambda: arg.map(|a| number(input, a)).transpose()?.unwrap_or(DEFAULT_UCB_LAMBDA),
        }),
        ("diverse", arg) => Ok(AcquisitionPolicy::Diverse {
            min_distance: arg
                .map(|a| number(input, a))
                .transpose()?
                .unwrap_or(DEFAULT_MIN_DISTANCE),
        }),
        _ => Err(ParseError::InvalidPolicy(input.to_string())),
    }
}

/// Parses a position list such as `1-5,8,10-12` into sorted 1-based positions.
pub fn parse_positions(input: &str) -> Result<Vec<usize>, ParseError> {
    let mut positions = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start: usize = number(input, start)?;
                let end: usize = number(input, end)?;
                if start > end {
                    return Err(ParseError::InvalidRange(part.to_string()));
                }
                positions.extend(start..=end);
            }
            None => positions.push(number(input, part)?),
        }
    }
    positions.sort_unstable();
    positions.dedup();
    Ok(positions)
}

/// Splits `KEY=VALUE` at the first `=`.
pub fn parse_assignment(input: &str) -> Result<(&str, &str), ParseError> {
    input
        .split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| ParseError::InvalidAssignment(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies_parse_with_and_without_arguments() {
        assert_eq!(parse_policy("exploit").unwrap(), AcquisitionPolicy::Exploit);
        assert_eq!(
            parse_policy("UCB:2.5").unwrap(),
            AcquisitionPolicy::UpperConfidenceBound { lambda: 2.5 }
        );
        assert_eq!(
            parse_policy("ucb").unwrap(),
            AcquisitionPolicy::UpperConfidenceBound { lambda: 1.0 }
        );
        assert_eq!(
            parse_policy("diverse:3").unwrap(),
            AcquisitionPolicy::Diverse { min_distance: 3 }
        );
    }

    #[test]
    fn bad_policies_are_rejected() {
        assert_eq!(
            parse_policy("thompson"),
            Err(ParseError::InvalidPolicy("thompson".to_string()))
        );
        assert!(matches!(
            parse_policy("ucb:abc"),
            Err(ParseError::InvalidNumber { .. })
        ));
        assert!(parse_policy("exploit:1").is_err());
    }

    #[test]
    fn position_lists_expand_ranges() {
        assert_eq!(parse_positions("1-3, 8,2").unwrap(), vec![1, 2, 3, 8]);
        assert_eq!(
            parse_positions("5-2"),
            Err(ParseError::InvalidRange("5-2".to_string()))
        );
    }

    #[test]
    fn assignments_split_at_the_first_equals_sign() {
        assert_eq!(parse_assignment("a.b=c=d").unwrap(), ("a.b", "c=d"));
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=1").is_err());
    }
}
