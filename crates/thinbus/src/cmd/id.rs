use serde::Serialize;
use thinbus_message::MessageId;
use tracing::debug;

use crate::cmd::{DecodeArgs, EncodeArgs};
use crate::exit::{message_error, CliResult, SUCCESS};
use crate::output::{print_rows, OutputFormat, Row};

#[derive(Serialize)]
struct IdRow {
    name: Option<&'static str>,
    id: String,
    raw: u32,
    list: u8,
    object: u8,
    interface: u8,
    member: u8,
    reply: bool,
}

impl IdRow {
    fn new(name: Option<&'static str>, id: MessageId) -> Self {
        let request = id.request();
        Self {
            name,
            id: id.to_string(),
            raw: id.raw(),
            list: request.list_index(),
            object: id.object_index(),
            interface: id.interface_index(),
            member: id.member_index(),
            reply: id.is_reply(),
        }
    }
}

impl Row for IdRow {
    fn header() -> Vec<&'static str> {
        vec!["NAME", "ID", "LIST", "OBJECT", "INTERFACE", "MEMBER", "REPLY"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.name.unwrap_or("-").to_string(),
            self.id.clone(),
            self.list.to_string(),
            self.object.to_string(),
            self.interface.to_string(),
            self.member.to_string(),
            self.reply.to_string(),
        ]
    }
}

pub fn encode(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let mut id = MessageId::encode(args.list, args.object, args.interface, args.member);
    if args.reply {
        id = id.reply();
    }
    debug!(msg_id = %id, "encoded identifier");

    let row = IdRow::new(None, id);
    print_rows(std::slice::from_ref(&row), &row, format);
    Ok(SUCCESS)
}

pub fn decode(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let id: MessageId = args
        .id
        .parse()
        .map_err(|err| message_error("decode identifier", err))?;
    debug!(input = %args.id, msg_id = %id, "decoded identifier");

    let row = IdRow::new(None, id);
    print_rows(std::slice::from_ref(&row), &row, format);
    Ok(SUCCESS)
}

pub fn well_known(format: OutputFormat) -> CliResult<i32> {
    let rows = [
        IdRow::new(Some("FOUND_ADVERTISED_NAME"), MessageId::FOUND_ADVERTISED_NAME),
        IdRow::new(Some("JOIN_SESSION"), MessageId::JOIN_SESSION),
        IdRow::new(Some("JOIN_SESSION_REPLY"), MessageId::JOIN_SESSION.reply()),
    ];
    print_rows(&rows, &rows, format);
    Ok(SUCCESS)
}
