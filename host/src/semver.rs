// Copyright 2020 Netwarps Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Matching of versioned protocol ids.
//!
//! A versioned id is a path whose last segment is a `MAJOR.MINOR.PATCH`
//! version, e.g. `/chat/1.2.0`.

use crate::error::HostError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Version {
    major: u64,
    minor: u64,
    patch: u64,
}

fn parse_version(s: &str) -> Option<Version> {
    let mut parts = s.split('.').map(|n| {
        if n.is_empty() || !n.bytes().all(|b| b.is_ascii_digit()) {
            None
        } else {
            n.parse::<u64>().ok()
        }
    });
    let v = Version {
        major: parts.next()??,
        minor: parts.next()??,
        patch: parts.next()??,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(v)
}

/// Builds a match function for protocols compatible with `base`.
///
/// A protocol is compatible when it has the same path segments as `base`
/// before the version, and a version with the same major. Minor and patch
/// are free: a requester on a newer minor is accepted too, which is looser
/// than matchers capping the minor at the one of `base`. Fails when `base`
/// does not end with a valid version.
pub fn semver_matcher(base: &str) -> Result<impl Fn(&str) -> bool + Send + Sync + 'static, HostError> {
    let parts: Vec<String> = base.split('/').map(String::from).collect();
    let version = parts
        .last()
        .and_then(|v| parse_version(v))
        .ok_or_else(|| HostError::InvalidProtocolSpec(base.to_string(), "expected a MAJOR.MINOR.PATCH version".into()))?;
    let prefix = parts[..parts.len() - 1].to_vec();

    Ok(move |check: &str| {
        let chparts: Vec<&str> = check.split('/').collect();
        if chparts.len() != prefix.len() + 1 {
            return false;
        }
        if prefix.iter().zip(chparts.iter()).any(|(a, b)| a != b) {
            return false;
        }
        match chparts.last().and_then(|v| parse_version(v)) {
            Some(chvers) => chvers.major == version.major,
            None => false,
        }
    })
}
