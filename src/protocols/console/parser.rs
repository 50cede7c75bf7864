//! Console command parser.

use std::fmt;

/// Parsed console command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    /// Ping with an optional message to echo back.
    Ping(Option<String>),
    /// `quit` or `exit`.
    Quit,
    GeoFix(FixArgs),
}

/// Arguments of `geo fix`, already range-checked.
#[derive(Debug, Clone, PartialEq)]
pub struct FixArgs {
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: Option<f64>,
    pub satellites: Option<u8>,
    pub velocity: Option<f64>,
}

/// Parse failure, rendered as the `KO:` reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    Unknown(String),
    Usage(&'static str),
    InvalidNumber { field: &'static str, value: String },
    OutOfRange { field: &'static str, range: &'static str },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => f.write_str("empty command"),
            ParseError::Unknown(cmd) => write!(f, "unknown command '{cmd}', try 'help'"),
            ParseError::Usage(usage) => write!(f, "usage: {usage}"),
            ParseError::InvalidNumber { field, value } => {
                write!(f, "{field} is not a number: '{value}'")
            }
            ParseError::OutOfRange { field, range } => write!(f, "{field} must be in {range}"),
        }
    }
}

impl std::error::Error for ParseError {}

pub const GEO_FIX_USAGE: &str = "geo fix <longitude> <latitude> [<altitude> [<satellites> [<velocity>]]]";

/// Help text, one line per command.
pub const HELP: &[&str] = &[
    "help                 print this list",
    "ping [message]       check the connection",
    "geo fix <lon> <lat> [<alt> [<satellites> [<velocity>]]]",
    "                     send a position fix (degrees, meters, knots)",
    "quit|exit            close this connection",
];

/// Parse one console line. Keywords are case-insensitive.
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    let mut words = line.split_whitespace();
    let Some(keyword) = words.next() else {
        return Err(ParseError::Empty);
    };

    if keyword.eq_ignore_ascii_case("help") {
        Ok(Command::Help)
    } else if keyword.eq_ignore_ascii_case("quit") || keyword.eq_ignore_ascii_case("exit") {
        Ok(Command::Quit)
    } else if keyword.eq_ignore_ascii_case("ping") {
        let message = line[keyword.len()..].trim();
        Ok(Command::Ping((!message.is_empty()).then(|| message.to_string())))
    } else if keyword.eq_ignore_ascii_case("geo") {
        match words.next() {
            Some(sub) if sub.eq_ignore_ascii_case("fix") => {
                parse_fix(&words.collect::<Vec<_>>()).map(Command::GeoFix)
            }
            _ => Err(ParseError::Usage(GEO_FIX_USAGE)),
        }
    } else {
        Err(ParseError::Unknown(keyword.to_string()))
    }
}

fn parse_fix(args: &[&str]) -> Result<FixArgs, ParseError> {
    if args.len() < 2 || args.len() > 5 {
        return Err(ParseError::Usage(GEO_FIX_USAGE));
    }

    let longitude = number("longitude", args[0])?;
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ParseError::OutOfRange {
            field: "longitude",
            range: "[-180, 180]",
        });
    }

    let latitude = number("latitude", args[1])?;
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ParseError::OutOfRange {
            field: "latitude",
            range: "[-90, 90]",
        });
    }

    let altitude = args.get(2).map(|v| number("altitude", v)).transpose()?;

    let satellites = args
        .get(3)
        .map(|v| match v.parse::<u8>() {
            Ok(n @ 1..=12) => Ok(n),
            _ => Err(ParseError::OutOfRange {
                field: "satellites",
                range: "integers 1 to 12",
            }),
        })
        .transpose()?;

    let velocity = args.get(4).map(|v| number("velocity", v)).transpose()?;
    if velocity.is_some_and(|v| v < 0.0) {
        return Err(ParseError::OutOfRange {
            field: "velocity",
            range: "[0, inf)",
        });
    }

    Ok(FixArgs {
        longitude,
        latitude,
        altitude,
        satellites,
        velocity,
    })
}

/// Finite decimal number.
fn number(field: &'static str, value: &str) -> Result<f64, ParseError> {
    match value.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(ParseError::InvalidNumber {
            field,
            value: value.to_string(),
        }),
    }
}
