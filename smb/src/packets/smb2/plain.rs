use binrw::prelude::*;

use super::header::*;
use super::*;

/// Internal, one-use-macro generating the request and response content enums.
/// For example, the entry `Negotiate: negotiate` generates:
/// ```ignore
/// // in RequestContent:
/// #[br(pre_assert(matches!(command, Command::Negotiate)))]
/// Negotiate(negotiate::NegotiateRequest),
/// // in ResponseContent:
/// #[br(pre_assert(matches!(command, Command::Negotiate) && ResponseContent::carries_body(command, status)))]
/// Negotiate(negotiate::NegotiateResponse),
/// ```
macro_rules! make_content {
    (
        $($cmd:ident: $module:ident,)+
    ) => {
        paste::paste!{

#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone)]
#[br(import(command: &Command))]
pub enum RequestContent {
    $(
        #[br(pre_assert(matches!(command, Command::$cmd)))]
        $cmd($module::[<$cmd Request>]),
    )+
}

impl RequestContent {
    pub fn associated_cmd(&self) -> Command {
        match self {
            $(
                RequestContent::$cmd(_) => Command::$cmd,
            )+
        }
    }

    /// Whether a request for `command` can be decoded into [`RequestContent`].
    pub fn is_known(command: Command) -> bool {
        matches!(command, $(Command::$cmd)|+)
    }
}

#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone)]
#[br(import(command: &Command, status: u32))]
pub enum ResponseContent {
    $(
        #[br(pre_assert(matches!(command, Command::$cmd) && ResponseContent::carries_body(*command, status)))]
        $cmd($module::[<$cmd Response>]),
    )+

    Error(error::ErrorResponse),
}

impl ResponseContent {
    $(
        #[doc = concat!("Unwraps a ", stringify!($cmd), " response body.")]
        pub fn [<to_ $cmd:snake>](self) -> crate::Result<$module::[<$cmd Response>]> {
            match self {
                ResponseContent::$cmd(response) => Ok(response),
                other => Err(crate::Error::InvalidMessage(format!(
                    "Expected {} response body, got {:?}",
                    stringify!($cmd),
                    other
                ))),
            }
        }
    )+
}
        }
    };
}

make_content!(
    Negotiate: negotiate,
    SessionSetup: session_setup,
    Logoff: session_setup,
    TreeConnect: tree_connect,
    TreeDisconnect: tree_connect,
    Echo: echo,
);

impl ResponseContent {
    /// Responses carry a command body on success, and session setup also
    /// while authentication needs more round trips. Anything else is an error body.
    pub fn carries_body(command: Command, status: u32) -> bool {
        status == Status::U32_SUCCESS
            || (command == Command::SessionSetup && status == Status::U32_MORE_PROCESSING_REQUIRED)
    }
}

/// A plain, single, SMB2 request.
#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
pub struct PlainRequest {
    pub header: Header,
    #[br(args(&header.command))]
    pub content: RequestContent,
}

impl PlainRequest {
    pub fn new(content: RequestContent) -> PlainRequest {
        PlainRequest {
            header: Header::new(content.associated_cmd()),
            content,
        }
    }
}

/// A plain, single, SMB2 response.
#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
pub struct PlainResponse {
    pub header: Header,
    #[br(args(&header.command, header.status))]
    pub content: ResponseContent,
}

impl PlainResponse {
    /// A response to `request`, echoing its identifiers.
    pub fn reply_to(request: &Header, status: Status, content: ResponseContent) -> PlainResponse {
        let mut header = Header::new(request.command);
        header.status = status as u32;
        header.message_id = request.message_id;
        header.session_id = request.session_id;
        header.tree_id = request.tree_id;
        header.credit_charge = request.credit_charge;
        header.credit_request = request.credit_request.max(1);
        header.flags = header.flags.with_server_to_redir(true);
        PlainResponse { header, content }
    }
}

/// Contains both tests and test helpers for other modules' tests requiring this module.
#[cfg(test)]
pub mod tests {
    use std::io::Cursor;

    use super::*;

    /// Encodes a content as a full request message, header included.
    pub fn encode_request(content: RequestContent) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        PlainRequest::new(content).write(&mut cursor).unwrap();
        cursor.into_inner()
    }

    /// Encodes a content as a full message, but returns only the content bytes.
    ///
    /// Offsets inside the content stay relative to the start of the SMB header.
    pub fn encode_content(content: RequestContent) -> Vec<u8> {
        encode_request(content)[Header::STRUCT_SIZE..].to_vec()
    }

    pub fn decode_content(bytes: &[u8]) -> PlainResponse {
        let mut cursor = Cursor::new(bytes);
        cursor.read_le().unwrap()
    }

    pub fn decode_request(bytes: &[u8]) -> PlainRequest {
        let mut cursor = Cursor::new(bytes);
        cursor.read_le().unwrap()
    }

    #[test]
    pub fn test_reply_header_mirrors_request() {
        let mut request = PlainRequest::new(RequestContent::Echo(EchoRequest::default()));
        request.header.message_id = 7;
        request.header.session_id = 0x1122;
        let response = PlainResponse::reply_to(
            &request.header,
            Status::Success,
            ResponseContent::Echo(EchoResponse::default()),
        );
        assert_eq!(response.header.message_id, 7);
        assert_eq!(response.header.session_id, 0x1122);
        assert!(response.header.flags.server_to_redir());
        assert_eq!(response.header.credit_request, 1);
    }

    #[test]
    pub fn test_failed_setup_parses_as_error() {
        let mut header = Header::new(Command::SessionSetup);
        header.status = Status::LogonFailure as u32;
        let response = PlainResponse {
            header,
            content: ResponseContent::Error(ErrorResponse::default()),
        };
        let mut cursor = Cursor::new(Vec::new());
        response.write(&mut cursor).unwrap();
        let parsed = decode_content(&cursor.into_inner());
        assert_eq!(parsed.content, ResponseContent::Error(ErrorResponse::default()));
    }
}
