use atat::atat_derive::AtatResp;

/// Commands whose reply carries no payload beyond the terminal line. All
/// commands in this crate use it: state lines are interpreted by the link
/// parser, not by per-command response parsing.
#[derive(Clone, AtatResp)]
pub struct NoResponse;
