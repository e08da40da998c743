use serde::Serialize;
use serde_json::Value;
use thinbus_engine::codec::prepare_args;
use thinbus_message::Signature;
use tracing::{debug, warn};

use crate::cmd::CheckArgs;
use crate::exit::{engine_error, json_error, message_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_rows, OutputFormat, Row};

#[derive(Serialize)]
struct ArgRow {
    index: usize,
    code: char,
    kind: &'static str,
    value: Value,
}

impl Row for ArgRow {
    fn header() -> Vec<&'static str> {
        vec!["INDEX", "CODE", "TYPE", "VALUE"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.index.to_string(),
            self.code.to_string(),
            self.kind.to_string(),
            self.value.to_string(),
        ]
    }
}

#[derive(Serialize)]
struct CheckOutput<'a> {
    signature: &'a str,
    arguments: &'a [ArgRow],
    truncated: bool,
}

/// Run values through the same conversion `invoke` applies before any bus I/O.
pub fn check(args: CheckArgs, format: OutputFormat) -> CliResult<i32> {
    let signature =
        Signature::parse(&args.signature).map_err(|err| message_error("parse signature", err))?;
    let values: Value =
        serde_json::from_str(&args.values).map_err(|err| json_error("parse values", err))?;
    let Value::Array(values) = values else {
        return Err(CliError::new(USAGE, "--values must be a JSON array"));
    };

    let prepared =
        prepare_args(&signature, &values).map_err(|err| engine_error("convert values", err))?;
    let rows = prepared
        .iter()
        .enumerate()
        .map(|(index, arg)| {
            let code = arg.type_code();
            arg.to_value()
                .map(|value| ArgRow {
                    index,
                    code: code.as_char(),
                    kind: code.name(),
                    value,
                })
                .map_err(|err| message_error("render value", err))
        })
        .collect::<CliResult<Vec<_>>>()?;

    let truncated = rows.len() < signature.len();
    if truncated {
        warn!(
            signature = %signature,
            supplied = rows.len(),
            "fewer values than signature positions, remaining arguments are dropped"
        );
    }
    debug!(signature = %signature, arguments = rows.len(), "values checked");

    let out = CheckOutput {
        signature: signature.as_str(),
        arguments: &rows,
        truncated,
    };
    print_rows(&rows, &out, format);
    Ok(SUCCESS)
}
