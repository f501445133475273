use std::fmt;

/// Width of every command/reply token on the wire.
pub const TOKEN_LEN: usize = 12;

/// A command (driver → engine) or reply (engine → driver) word.
///
/// On the wire each token is [`TOKEN_LEN`] ASCII bytes, left-justified and
/// space padded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    /// Geometry follows.
    Posdata,
    /// Request the forces for the last geometry.
    GetForce,
    /// Ask the engine for its state.
    Status,
    /// Initialization payload follows.
    Init,
    /// End the session.
    Exit,
    /// Engine is waiting for a geometry.
    Ready,
    /// Engine holds results for the last geometry.
    HaveData,
    /// Force payload follows.
    ForceReady,
    /// Engine wants an `INIT` message.
    NeedInit,
    /// A word outside the vocabulary, kept verbatim for diagnostics.
    Unknown(String),
}

impl Token {
    /// Commands sent by the driver.
    pub const REQUESTS: [Token; 5] = [
        Token::Posdata,
        Token::GetForce,
        Token::Status,
        Token::Init,
        Token::Exit,
    ];

    /// Replies sent by the engine.
    pub const REPLIES: [Token; 4] = [
        Token::Ready,
        Token::HaveData,
        Token::ForceReady,
        Token::NeedInit,
    ];

    /// Wire text of the token (without padding).
    pub fn as_str(&self) -> &str {
        match self {
            Token::Posdata => "POSDATA",
            Token::GetForce => "GETFORCE",
            Token::Status => "STATUS",
            Token::Init => "INIT",
            Token::Exit => "EXIT",
            Token::Ready => "READY",
            Token::HaveData => "HAVEDATA",
            Token::ForceReady => "FORCEREADY",
            Token::NeedInit => "NEEDINIT",
            Token::Unknown(word) => word,
        }
    }

    /// Map a trimmed wire word onto the vocabulary.
    pub fn parse(word: &str) -> Token {
        match word {
            "POSDATA" => Token::Posdata,
            "GETFORCE" => Token::GetForce,
            "STATUS" => Token::Status,
            "INIT" => Token::Init,
            "EXIT" => Token::Exit,
            "READY" => Token::Ready,
            "HAVEDATA" => Token::HaveData,
            "FORCEREADY" => Token::ForceReady,
            "NEEDINIT" => Token::NeedInit,
            other => Token::Unknown(other.to_string()),
        }
    }

    pub fn is_request(&self) -> bool {
        Self::REQUESTS.contains(self)
    }

    pub fn is_reply(&self) -> bool {
        Self::REPLIES.contains(self)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
