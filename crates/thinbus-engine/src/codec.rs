//! Signature-driven conversion between host values and message arguments.
//!
//! Marshaling walks the signature and the value list in lockstep. It stops
//! cleanly at the first missing or `null` value, so a caller may omit
//! trailing arguments. Values beyond the signature are ignored.

use serde_json::Value;
use thinbus_message::{Argument, Message, Signature};
use thinbus_transport::NativeBus;
use tracing::debug;

use crate::error::{EngineError, Result};

/// Convert `values` into typed arguments without touching the bus.
///
/// The result may be shorter than the signature (see module docs).
pub fn prepare_args(signature: &Signature, values: &[Value]) -> Result<Vec<Argument>> {
    let mut args = Vec::with_capacity(signature.len());
    for (index, code) in signature.codes().iter().enumerate() {
        let Some(value) = values.get(index).filter(|value| !value.is_null()) else {
            debug!(
                signature = signature.as_str(),
                marshaled = index,
                "argument list ended before signature"
            );
            break;
        };
        let arg = Argument::from_value(*code, value)
            .map_err(|source| EngineError::Argument { index, source })?;
        args.push(arg);
    }
    Ok(args)
}

/// Append prepared arguments to an outbound message.
pub fn marshal_prepared<B>(bus: &B, msg: &mut Message, args: Vec<Argument>) -> Result<usize>
where
    B: NativeBus + ?Sized,
{
    let count = args.len();
    for arg in args {
        bus.marshal_arg(msg, arg)?;
    }
    Ok(count)
}

/// Marshal `values` into `msg` following `signature`.
///
/// Returns how many arguments were written.
pub fn marshal_args<B>(
    bus: &B,
    msg: &mut Message,
    signature: &Signature,
    values: &[Value],
) -> Result<usize>
where
    B: NativeBus + ?Sized,
{
    let args = prepare_args(signature, values)?;
    marshal_prepared(bus, msg, args)
}

/// Read one argument per signature character from an inbound message.
///
/// Fails if the message runs out of arguments or an argument has the wrong
/// type.
pub fn unmarshal_args<B>(
    bus: &B,
    msg: &mut Message,
    signature: &Signature,
) -> Result<Vec<Value>>
where
    B: NativeBus + ?Sized,
{
    signature
        .codes()
        .iter()
        .map(|code| -> Result<Value> {
            let arg = bus.unmarshal_arg(msg, *code)?;
            Ok(arg.to_value()?)
        })
        .collect()
}
