//! Persisted key layout
//!
//! Every record the pool keeps lives under one of these patterns:
//!
//! | key                                 | value                       |
//! |-------------------------------------|-----------------------------|
//! | `usage:{model}:{credential}`        | last claim, unix millis     |
//! | `quota:{model}:{credential}:{day}`  | successful calls that day   |
//! | `error:{model}:{credential}:{day}`  | failed calls that day       |
//! | `ban:{model}:{credential}`          | presence = banned           |
//! | `lock:{model}:{credential}`         | presence = claim in flight  |
//! | `cursor:{model}`                    | index of last claimed key   |

use common::Credential;

pub fn usage(model: &str, credential: &Credential) -> String {
    format!("usage:{model}:{}", credential.expose())
}

pub fn quota(model: &str, credential: &Credential, day: &str) -> String {
    format!("quota:{model}:{}:{day}", credential.expose())
}

pub fn error(model: &str, credential: &Credential, day: &str) -> String {
    format!("error:{model}:{}:{day}", credential.expose())
}

pub fn ban(model: &str, credential: &Credential) -> String {
    format!("ban:{model}:{}", credential.expose())
}

pub fn lock(model: &str, credential: &Credential) -> String {
    format!("lock:{model}:{}", credential.expose())
}

pub fn cursor(model: &str) -> String {
    format!("cursor:{model}")
}
