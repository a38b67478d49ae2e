//! Placeholder substitution for action parameters.
//!
//! Supported: `{{job.id}}`, `{{task.id}}`, `{{node.path}}`, `{{nodes.count}}`,
//! `{{user.login}}`, `{{output}}`. Unknown placeholders are left as is.

use cellar_jobs::ActionMessage;

pub struct Vars<'a> {
    pub job_id: &'a str,
    pub task_id: &'a str,
    pub input: &'a ActionMessage,
}

pub fn render(template: &str, vars: &Vars<'_>) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    let first_node = vars.input.nodes.first().map(|n| n.path.as_str()).unwrap_or("");
    let first_user = vars.input.users.first().map(|u| u.login.as_str()).unwrap_or("");
    let output = vars
        .input
        .last_output()
        .map(|o| {
            if o.success {
                o.string_body.as_str()
            } else {
                o.error_string.as_str()
            }
        })
        .unwrap_or("");

    template
        .replace("{{job.id}}", vars.job_id)
        .replace("{{task.id}}", vars.task_id)
        .replace("{{node.path}}", first_node)
        .replace("{{nodes.count}}", &vars.input.nodes.len().to_string())
        .replace("{{user.login}}", first_user)
        .replace("{{output}}", output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_core::{Node, User};
    use cellar_jobs::ActionOutput;

    #[test]
    fn test_render_placeholders() {
        let input = ActionMessage::default()
            .with_nodes(vec![Node::from_path("/a.txt"), Node::from_path("/b.txt")])
            .with_user(User::new("alice"))
            .with_output(ActionOutput::success().with_string("ok"));
        let vars = Vars {
            job_id: "j1",
            task_id: "t1",
            input: &input,
        };
        assert_eq!(
            render("{{job.id}}/{{task.id}} {{node.path}} x{{nodes.count}} by {{user.login}}: {{output}}", &vars),
            "j1/t1 /a.txt x2 by alice: ok"
        );
    }

    #[test]
    fn test_render_failure_output_and_unknown() {
        let input = ActionMessage::default().with_error("boom");
        let vars = Vars {
            job_id: "j",
            task_id: "t",
            input: &input,
        };
        assert_eq!(render("{{output}} {{node.path}}|{{nope}}", &vars), "boom |{{nope}}");
        assert_eq!(render("plain", &vars), "plain");
    }
}
