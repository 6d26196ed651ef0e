//! Byte-size arguments such as `4096`, `64K` or `2M`.

use nom::IResult;
use nom::character::complete::{digit1, one_of};
use nom::combinator::{all_consuming, map_res, opt};
use nom::sequence::pair;

fn size_literal(input: &str) -> IResult<&str, (u64, Option<char>)> {
    all_consuming(pair(
        map_res(digit1, |digits: &str| digits.parse::<u64>()),
        opt(one_of("kKmMgG")),
    ))(input)
}

/// Parses a byte count with an optional binary suffix.
pub fn parse_size(arg: &str) -> Result<u64, String> {
    let (_, (count, suffix)) =
        size_literal(arg.trim()).map_err(|err| format!("invalid size `{arg}`: {err}"))?;
    let shift = match suffix {
        None => 0,
        Some('k' | 'K') => 10,
        Some('m' | 'M') => 20,
        Some(_) => 30,
    };
    count
        .checked_mul(1 << shift)
        .ok_or_else(|| format!("size `{arg}` does not fit in 64 bits"))
}

/// Renders a byte count the way [`parse_size`] reads it back.
pub fn format_size(bytes: u64) -> String {
    match bytes {
        0 => "0".to_string(),
        b if b % (1 << 30) == 0 => format!("{}G", b >> 30),
        b if b % (1 << 20) == 0 => format!("{}M", b >> 20),
        b if b % (1 << 10) == 0 => format!("{}K", b >> 10),
        b => b.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixes() {
        assert_eq!(parse_size("4096"), Ok(4096));
        assert_eq!(parse_size("64K"), Ok(64 << 10));
        assert_eq!(parse_size("64k"), Ok(64 << 10));
        assert_eq!(parse_size(" 2M "), Ok(2 << 20));
        assert_eq!(parse_size("1G"), Ok(1 << 30));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("K").is_err());
        assert!(parse_size("12KB").is_err());
        assert!(parse_size("-1").is_err());
        assert!(parse_size("99999999999999G").is_err());
    }

    #[test]
    fn test_format_reads_back() {
        for bytes in [0, 100, 2048, 64 << 10, 3 << 20, 1 << 30] {
            assert_eq!(parse_size(&format_size(bytes)), Ok(bytes));
        }
    }
}
