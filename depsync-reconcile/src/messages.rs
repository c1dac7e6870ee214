//! Human-readable text attached to pull requests.

/// Azure DevOps rejects descriptions longer than this (in characters).
pub const MAX_DESCRIPTION_LENGTH: usize = 4_000;

const TRUNCATION_NOTICE: &str = "\n\n_Description has been truncated_";

/// Comment left when abandoning a pull request, by close reason code.
///
/// `None` for reasons without a message, including the superseded-by codes.
pub fn close_comment(reason: &str, dependency_names: &[String]) -> Option<String> {
    let names = dependency_names.join(", ");
    let text = match reason {
        "dependencies_changed" => {
            "Looks like these dependencies have changed. Closing in favour of a new pull request.".to_string()
        }
        "dependency_group_empty" => {
            "Looks like the dependencies in this group are now up to date or no longer used.".to_string()
        }
        "dependency_removed" => format!("Looks like {names} is no longer a dependency."),
        "up_to_date" => format!("Looks like {names} is up-to-date now, so this is no longer needed."),
        "update_no_longer_possible" => {
            format!("Looks like {names} can no longer be updated, so this is no longer needed.")
        }
        _ => return None,
    };
    Some(text)
}

/// Cut `description` to fit [`MAX_DESCRIPTION_LENGTH`], marking the cut.
pub fn truncate_description(description: &str) -> String {
    if description.chars().count() <= MAX_DESCRIPTION_LENGTH {
        return description.to_string();
    }
    let keep = MAX_DESCRIPTION_LENGTH - TRUNCATION_NOTICE.chars().count();
    let mut out: String = description.chars().take(keep).collect();
    out.push_str(TRUNCATION_NOTICE);
    out
}
