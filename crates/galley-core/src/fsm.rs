//! Which lifecycle actions to run to get from one action to another.

use galley_schema::Action;

/// The ordered actions that take an instance from `last` to `desired`.
///
/// `None` on either side means `destroy`, the "nothing provisioned" state.
/// Moving forward runs every action after `last` up to and including
/// `desired`; staying put or moving backward runs `desired` alone.
pub fn actions(last: Option<Action>, desired: Option<Action>) -> Vec<Action> {
    let last = last.unwrap_or(Action::Destroy).index();
    let desired = desired.unwrap_or(Action::Destroy);

    if last >= desired.index() {
        return vec![desired];
    }
    Action::ALL[last + 1..=desired.index()].to_vec()
}
