use std::io::{BufRead, Write};

use anyhow::{Context, Result, bail};

use crate::api::Workspace;

/// Pick one workspace: the only one, the one named by `requested`, or ask.
pub fn select_workspace<R: BufRead, W: Write>(
    mut workspaces: Vec<Workspace>,
    requested: Option<&str>,
    input: &mut R,
    output: &mut W,
) -> Result<Workspace> {
    if workspaces.is_empty() {
        bail!("no workspaces found where the user is a member (guest-only workspaces are excluded)");
    }
    if let Some(requested) = requested {
        return find_workspace(&workspaces, requested).cloned();
    }
    if workspaces.len() == 1 {
        return Ok(workspaces.swap_remove(0));
    }
    prompt_for_workspace(&workspaces, input, output).cloned()
}

/// Match by exact id first, then by case-insensitive name.
pub fn find_workspace<'a>(workspaces: &'a [Workspace], requested: &str) -> Result<&'a Workspace> {
    let requested = requested.trim();
    if let Some(workspace) = workspaces.iter().find(|item| item.id == requested) {
        return Ok(workspace);
    }

    let matches = workspaces
        .iter()
        .filter(|item| item.name.trim().eq_ignore_ascii_case(requested))
        .collect::<Vec<_>>();
    match matches.as_slice() {
        [workspace] => Ok(*workspace),
        [] => bail!("no workspace matches {requested}"),
        _ => bail!(
            "workspace name {requested} is ambiguous ({} matches); pass the workspace id instead",
            matches.len()
        ),
    }
}

pub fn prompt_for_workspace<'a, R: BufRead, W: Write>(
    workspaces: &'a [Workspace],
    input: &mut R,
    output: &mut W,
) -> Result<&'a Workspace> {
    loop {
        writeln!(output, "Select the intended workspace:")?;
        for (index, workspace) in workspaces.iter().enumerate() {
            writeln!(output, " {}) {}", index + 1, workspace.name)?;
        }
        write!(output, "Input: ")?;
        output.flush()?;

        let mut line = String::new();
        let read = input
            .read_line(&mut line)
            .context("failed to read workspace selection")?;
        if read == 0 {
            bail!("no workspace selected (input closed)");
        }

        let selected = line
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|choice| choice.checked_sub(1))
            .and_then(|index| workspaces.get(index));
        match selected {
            Some(workspace) => {
                writeln!(output)?;
                return Ok(workspace);
            }
            None => {
                writeln!(output, "Invalid input, please try again")?;
                writeln!(output)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{find_workspace, select_workspace};
    use crate::api::Workspace;

    fn workspace(id: &str, name: &str) -> Workspace {
        Workspace {
            id: id.to_string(),
            name: name.to_string(),
            root_page_ids: Vec::new(),
        }
    }

    #[test]
    fn single_workspace_is_selected_without_prompting() {
        let mut input = Cursor::new(Vec::new());
        let mut output = Vec::new();

        let selected = select_workspace(
            vec![workspace("w1", "Personal")],
            None,
            &mut input,
            &mut output,
        )
        .expect("select");

        assert_eq!(selected.id, "w1");
        assert!(output.is_empty());
    }

    #[test]
    fn prompt_retries_until_valid_choice() {
        let mut input = Cursor::new(b"0\nabc\n2\n".to_vec());
        let mut output = Vec::new();

        let selected = select_workspace(
            vec![workspace("w1", "Personal"), workspace("w2", "Team")],
            None,
            &mut input,
            &mut output,
        )
        .expect("select");

        assert_eq!(selected.id, "w2");
        let rendered = String::from_utf8(output).expect("utf8");
        assert!(rendered.contains(" 1) Personal\n 2) Team\n"));
        assert_eq!(rendered.matches("Invalid input, please try again").count(), 2);
    }

    #[test]
    fn prompt_fails_when_input_closes() {
        let mut input = Cursor::new(b"7\n".to_vec());
        let mut output = Vec::new();

        let error = select_workspace(
            vec![workspace("w1", "Personal"), workspace("w2", "Team")],
            None,
            &mut input,
            &mut output,
        )
        .expect_err("must fail");

        assert!(error.to_string().contains("input closed"));
    }

    #[test]
    fn requested_workspace_matches_id_or_name() {
        let workspaces = vec![workspace("w1", "Personal"), workspace("w2", "Team")];

        assert_eq!(find_workspace(&workspaces, "w2").expect("id").name, "Team");
        assert_eq!(
            find_workspace(&workspaces, " personal ").expect("name").id,
            "w1"
        );
        assert!(find_workspace(&workspaces, "Other").is_err());
    }

    #[test]
    fn ambiguous_name_is_rejected() {
        let workspaces = vec![workspace("w1", "Team"), workspace("w2", "team")];
        let error = find_workspace(&workspaces, "TEAM").expect_err("ambiguous");
        assert!(error.to_string().contains("ambiguous"));
    }

    #[test]
    fn empty_workspace_list_is_an_error() {
        let mut input = Cursor::new(Vec::new());
        let mut output = Vec::new();
        assert!(select_workspace(Vec::new(), Some("w1"), &mut input, &mut output).is_err());
    }
}
