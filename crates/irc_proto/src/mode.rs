//! Mode-string folding (the `IrcUtils` component of spec.md section 2).
//!
//! MODE messages multiplex channel modes and per-user status modes on one wire syntax: a mode
//! string of `+`/`-` tokens followed by a parallel parameter list. This module only folds the
//! mode string into a structured sequence of changes; it has no notion of which characters are
//! per-user status modes or which mode classes take a parameter — that's server-announced
//! (PREFIX, CHANMODES) state that the caller supplies via the `takes_param` callback, per
//! spec.md section 4.3.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChange {
    pub sign: Sign,
    pub mode: char,
    pub param: Option<String>,
}

/// Fold a mode string (e.g. `"+ov-b"`) against its parameter list into structured changes.
///
/// `takes_param(mode, sign)` is asked, for each mode character, whether it should consume the
/// next parameter. It is the caller's responsibility to encode PREFIX / CHANMODES class rules.
pub fn fold_modes<F>(mode_str: &str, params: &[String], mut takes_param: F) -> Vec<ModeChange>
where
    F: FnMut(char, Sign) -> bool,
{
    let mut changes = Vec::new();
    let mut sign = Sign::Add;
    let mut param_iter = params.iter();

    for c in mode_str.chars() {
        match c {
            '+' => sign = Sign::Add,
            '-' => sign = Sign::Remove,
            mode => {
                let param = if takes_param(mode, sign) {
                    param_iter.next().cloned()
                } else {
                    None
                };
                changes.push(ModeChange { sign, mode, param });
            }
        }
    }

    changes
}

/// Split a MODE/324 parameter tail into the mode string and the trailing parameter list, per
/// spec.md section 4.3 ("Split the parameter tail into a mode string ... and a parameter list").
/// In practice the mode string is always the first token; this just separates it from the rest.
pub fn split_mode_tail(params: &[String]) -> (&str, &[String]) {
    match params.split_first() {
        Some((mode_str, rest)) => (mode_str.as_str(), rest),
        None => ("", &[]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_signed_runs() {
        let params = vec!["alice".to_owned(), "bob".to_owned()];
        let changes = fold_modes("+ov", &params, |_, _| true);
        assert_eq!(
            changes,
            vec![
                ModeChange {
                    sign: Sign::Add,
                    mode: 'o',
                    param: Some("alice".to_owned())
                },
                ModeChange {
                    sign: Sign::Add,
                    mode: 'v',
                    param: Some("bob".to_owned())
                },
            ]
        );
    }

    #[test]
    fn sign_persists_until_toggled() {
        let params = vec!["alice".to_owned()];
        let changes = fold_modes("+o-v", &params, |_, _| true);
        assert_eq!(changes[0].sign, Sign::Add);
        assert_eq!(changes[1].sign, Sign::Remove);
    }

    #[test]
    fn no_param_modes_consume_nothing() {
        let changes = fold_modes("+nt", &[], |_, _| false);
        assert_eq!(changes[0].param, None);
        assert_eq!(changes[1].param, None);
    }

    #[test]
    fn class_aware_consumption_callback() {
        // Simulates CHANMODES class B (always takes a param) vs class D (never).
        let params = vec!["secretkey".to_owned()];
        let changes = fold_modes("+k-i", &params, |m, sign| match m {
            'k' => true,
            'i' => matches!(sign, Sign::Add), // class C-ish: only on add
            _ => false,
        });
        assert_eq!(changes[0].param.as_deref(), Some("secretkey"));
        assert_eq!(changes[1].param, None);
    }
}
