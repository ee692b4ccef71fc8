//! `config.xml` rendering for jobs and list views.

use farm_core::error::Result;
use farm_core::job::{JobKind, JobRecord, JobScope, ViewSpec};
use farm_core::ports::JobRenderer;
use std::fmt::Write;

/// Renders freestyle projects and list views.
#[derive(Debug, Clone, Default)]
pub struct XmlJobRenderer;

impl XmlJobRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render one job's `config.xml`.
    pub fn render(&self, record: &JobRecord) -> Result<String> {
        let params = &record.params;
        let mut xml = String::new();

        line(&mut xml, 0, "<?xml version='1.1' encoding='UTF-8'?>");
        line(&mut xml, 0, "<project>");
        line(
            &mut xml,
            1,
            &format!(
                "<description>{}</description>",
                escape(&description(record))
            ),
        );
        line(&mut xml, 1, "<keepDependencies>false</keepDependencies>");

        line(&mut xml, 1, "<properties>");
        if let Some(priority) = params.priority {
            line(
                &mut xml,
                2,
                "<jenkins.advancedqueue.priority.strategy.PriorityJobProperty plugin=\"PrioritySorter\">",
            );
            line(&mut xml, 3, "<useJobPriority>true</useJobPriority>");
            line(&mut xml, 3, &format!("<priority>{priority}</priority>"));
            line(
                &mut xml,
                2,
                "</jenkins.advancedqueue.priority.strategy.PriorityJobProperty>",
            );
        }
        line(&mut xml, 1, "</properties>");

        match &params.repository_url {
            Some(url) => {
                line(&mut xml, 1, "<scm class=\"hudson.plugins.git.GitSCM\" plugin=\"git\">");
                line(&mut xml, 2, "<configVersion>2</configVersion>");
                line(&mut xml, 2, "<userRemoteConfigs>");
                line(&mut xml, 3, "<hudson.plugins.git.UserRemoteConfig>");
                line(&mut xml, 4, &format!("<url>{}</url>", escape(url)));
                line(&mut xml, 3, "</hudson.plugins.git.UserRemoteConfig>");
                line(&mut xml, 2, "</userRemoteConfigs>");
                line(&mut xml, 1, "</scm>");
            }
            None => line(&mut xml, 1, "<scm class=\"hudson.scm.NullSCM\"/>"),
        }

        match &params.node_label {
            Some(label) => {
                line(&mut xml, 1, &format!("<assignedNode>{}</assignedNode>", escape(label)));
                line(&mut xml, 1, "<canRoam>false</canRoam>");
            }
            None => line(&mut xml, 1, "<canRoam>true</canRoam>"),
        }
        line(&mut xml, 1, &format!("<disabled>{}</disabled>", record.disabled));

        if record.upstream.is_empty() {
            line(&mut xml, 1, "<triggers/>");
        } else {
            line(&mut xml, 1, "<triggers>");
            line(&mut xml, 2, "<jenkins.triggers.ReverseBuildTrigger>");
            line(
                &mut xml,
                3,
                &format!(
                    "<upstreamProjects>{}</upstreamProjects>",
                    escape(&record.upstream.join(", "))
                ),
            );
            line(&mut xml, 3, "<threshold>");
            line(&mut xml, 4, "<name>SUCCESS</name>");
            line(&mut xml, 4, "<ordinal>0</ordinal>");
            line(&mut xml, 4, "<color>BLUE</color>");
            line(&mut xml, 4, "<completeBuild>true</completeBuild>");
            line(&mut xml, 3, "</threshold>");
            line(&mut xml, 2, "</jenkins.triggers.ReverseBuildTrigger>");
            line(&mut xml, 1, "</triggers>");
        }

        line(&mut xml, 1, "<builders>");
        line(&mut xml, 2, "<hudson.tasks.Shell>");
        line(
            &mut xml,
            3,
            &format!("<command>{}</command>", escape(&command(record))),
        );
        line(&mut xml, 2, "</hudson.tasks.Shell>");
        line(&mut xml, 1, "</builders>");

        line(&mut xml, 1, "<publishers>");
        if !record.children.is_empty() {
            line(&mut xml, 2, "<hudson.tasks.BuildTrigger>");
            line(
                &mut xml,
                3,
                &format!(
                    "<childProjects>{}</childProjects>",
                    escape(&record.children.join(", "))
                ),
            );
            line(&mut xml, 3, "<threshold>");
            line(&mut xml, 4, "<name>SUCCESS</name>");
            line(&mut xml, 4, "<ordinal>0</ordinal>");
            line(&mut xml, 4, "<color>BLUE</color>");
            line(&mut xml, 4, "<completeBuild>true</completeBuild>");
            line(&mut xml, 3, "</threshold>");
            line(&mut xml, 2, "</hudson.tasks.BuildTrigger>");
        }
        let recipients: Vec<&str> = params
            .notify_emails
            .iter()
            .chain(params.maintainer_emails.iter())
            .map(String::as_str)
            .collect();
        if !recipients.is_empty() {
            line(&mut xml, 2, "<hudson.tasks.Mailer plugin=\"mailer\">");
            line(
                &mut xml,
                3,
                &format!("<recipients>{}</recipients>", escape(&recipients.join(" "))),
            );
            line(&mut xml, 3, "<dontNotifyEveryUnstableBuild>false</dontNotifyEveryUnstableBuild>");
            line(&mut xml, 3, "<sendToIndividuals>false</sendToIndividuals>");
            line(&mut xml, 2, "</hudson.tasks.Mailer>");
        }
        line(&mut xml, 1, "</publishers>");

        line(&mut xml, 1, "<buildWrappers>");
        if let Some(minutes) = params.timeout_minutes {
            line(
                &mut xml,
                2,
                "<hudson.plugins.build__timeout.BuildTimeoutWrapper plugin=\"build-timeout\">",
            );
            line(
                &mut xml,
                3,
                "<strategy class=\"hudson.plugins.build_timeout.impl.AbsoluteTimeOutStrategy\">",
            );
            line(&mut xml, 4, &format!("<timeoutMinutes>{minutes}</timeoutMinutes>"));
            line(&mut xml, 3, "</strategy>");
            line(&mut xml, 2, "</hudson.plugins.build__timeout.BuildTimeoutWrapper>");
        }
        if let Some(credential) = &params.credential_id {
            line(
                &mut xml,
                2,
                "<com.cloudbees.jenkins.plugins.sshagent.SSHAgentBuildWrapper plugin=\"ssh-agent\">",
            );
            line(&mut xml, 3, "<credentialIds>");
            line(&mut xml, 4, &format!("<string>{}</string>", escape(credential)));
            line(&mut xml, 3, "</credentialIds>");
            line(&mut xml, 3, "<ignoreMissing>false</ignoreMissing>");
            line(
                &mut xml,
                2,
                "</com.cloudbees.jenkins.plugins.sshagent.SSHAgentBuildWrapper>",
            );
        }
        line(&mut xml, 1, "</buildWrappers>");
        line(&mut xml, 0, "</project>");

        Ok(xml)
    }

    /// Render a list view whose members are selected by regex.
    pub fn render_list_view(&self, view: &ViewSpec) -> String {
        let mut xml = String::new();
        line(&mut xml, 0, "<?xml version='1.1' encoding='UTF-8'?>");
        line(&mut xml, 0, "<hudson.model.ListView>");
        line(&mut xml, 1, &format!("<name>{}</name>", escape(&view.name)));
        line(&mut xml, 1, "<filterExecutors>false</filterExecutors>");
        line(&mut xml, 1, "<filterQueue>false</filterQueue>");
        line(&mut xml, 1, "<properties class=\"hudson.model.View$PropertyList\"/>");
        line(&mut xml, 1, "<jobNames>");
        line(&mut xml, 2, "<comparator class=\"hudson.util.CaseInsensitiveComparator\"/>");
        line(&mut xml, 1, "</jobNames>");
        line(&mut xml, 1, "<jobFilters/>");
        line(&mut xml, 1, "<columns>");
        for column in [
            "hudson.views.StatusColumn",
            "hudson.views.WeatherColumn",
            "hudson.views.JobColumn",
            "hudson.views.LastSuccessColumn",
            "hudson.views.LastFailureColumn",
            "hudson.views.LastDurationColumn",
            "hudson.views.BuildButtonColumn",
        ] {
            line(&mut xml, 2, &format!("<{column}/>"));
        }
        line(&mut xml, 1, "</columns>");
        line(
            &mut xml,
            1,
            &format!("<includeRegex>{}</includeRegex>", escape(&view.include_regex)),
        );
        line(&mut xml, 1, "<recurse>false</recurse>");
        line(&mut xml, 0, "</hudson.model.ListView>");
        xml
    }
}

impl JobRenderer for XmlJobRenderer {
    fn render_job(&self, record: &JobRecord) -> Result<String> {
        self.render(record)
    }

    fn render_view(&self, view: &ViewSpec) -> Result<String> {
        Ok(self.render_list_view(view))
    }
}

fn line(xml: &mut String, indent: usize, text: &str) {
    let _ = writeln!(xml, "{:width$}{text}", "", width = indent * 2);
}

fn description(record: &JobRecord) -> String {
    let params = &record.params;
    let subject = match &record.scope {
        JobScope::Package { package, target } => format!("'{package}' on {target}"),
        JobScope::Platform { os_code_name, arch } => format!("{os_code_name} {arch}"),
        JobScope::Distribution => format!("{} ({})", params.distribution, params.build_name),
    };
    format!(
        "Generated by farm: {} job for {subject}. Manual changes are overwritten.",
        record.kind
    )
}

/// Shell build step for a job.
fn command(record: &JobRecord) -> String {
    let params = &record.params;
    let mut env = vec![
        ("DISTRIBUTION", params.distribution.clone()),
        ("BUILD_NAME", params.build_name.clone()),
    ];
    if let JobScope::Package { package, target } = &record.scope {
        env.push(("PACKAGE", package.clone()));
        env.push(("OS_NAME", target.os_name.clone()));
        env.push(("OS_CODE_NAME", target.os_code_name.clone()));
        env.push(("ARCH", target.arch.clone()));
    }
    if let JobScope::Platform { os_code_name, arch } = &record.scope {
        env.push(("OS_CODE_NAME", os_code_name.clone()));
        env.push(("ARCH", arch.clone()));
    }
    if let Some(repo) = &params.target_repository {
        env.push(("TARGET_REPOSITORY", repo.clone()));
    }
    if let Some(queue) = &params.target_queue {
        env.push(("TARGET_QUEUE", queue.clone()));
    }

    let mut script = String::from("set -e\n");
    for (key, value) in env {
        let _ = writeln!(script, "export {key}='{}'", value.replace('\'', r"'\''"));
    }

    let step = match record.kind {
        JobKind::Binary if params.append_timestamp => {
            "makepkg --syncdeps --noconfirm --cleanbuild --holdver\n\
             for pkg in *.pkg.tar.*; do mv \"$pkg\" \"${pkg%.pkg.tar.*}-$(date +%Y%m%d%H%M%S).pkg.tar.${pkg##*.pkg.tar.}\"; done\n\
             scp *.pkg.tar.* \"$TARGET_REPOSITORY/incoming/\""
                .to_string()
        }
        JobKind::Binary => "makepkg --syncdeps --noconfirm --cleanbuild\n\
             scp *.pkg.tar.* \"$TARGET_REPOSITORY/incoming/\""
            .to_string(),
        JobKind::Source => "makepkg --allsource\nscp *.src.tar.* \"$TARGET_REPOSITORY/sources/\""
            .to_string(),
        JobKind::Import => "repo-import --queue \"$TARGET_QUEUE\" --distribution \"$DISTRIBUTION\""
            .to_string(),
        JobKind::SyncToTesting => {
            "repo-sync --from main --to testing --code-name \"$OS_CODE_NAME\" --arch \"$ARCH\""
                .to_string()
        }
        JobKind::SyncToMain => "repo-sync --from testing --to main".to_string(),
    };
    script.push_str(&step);
    script.push('\n');
    script
}

/// Escape text for XML element content and attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
