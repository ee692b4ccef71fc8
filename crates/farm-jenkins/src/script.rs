//! Offline mode: write documents to disk plus a Groovy script that applies
//! them from the Jenkins script console.

use async_trait::async_trait;
use farm_core::error::Result;
use farm_core::ports::ScriptSink;
use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const SCRIPT_FILE: &str = "reconfigure_jobs.groovy";

#[derive(Debug, Default)]
struct Written {
    jobs: BTreeSet<String>,
    views: BTreeSet<String>,
}

/// Writes `jobs/{name}.xml`, `views/{name}.xml` and [`SCRIPT_FILE`] below
/// one output directory.
#[derive(Debug)]
pub struct GroovyScriptSink {
    dir: PathBuf,
    written: Mutex<Written>,
}

impl GroovyScriptSink {
    /// Create the output directory layout.
    pub async fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(dir.join("jobs")).await?;
        tokio::fs::create_dir_all(dir.join("views")).await?;
        Ok(Self {
            dir,
            written: Mutex::new(Written::default()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn script_path(&self) -> PathBuf {
        self.dir.join(SCRIPT_FILE)
    }

    fn job_path(&self, name: &str) -> PathBuf {
        self.dir.join("jobs").join(format!("{name}.xml"))
    }

    fn view_path(&self, name: &str) -> PathBuf {
        self.dir.join("views").join(format!("{name}.xml"))
    }
}

#[async_trait]
impl ScriptSink for GroovyScriptSink {
    async fn write_job(&self, name: &str, config: &str) -> Result<()> {
        tokio::fs::write(self.job_path(name), config).await?;
        self.written.lock().await.jobs.insert(name.to_string());
        debug!(job = %name, "Wrote job config");
        Ok(())
    }

    async fn write_view(&self, name: &str, config: &str) -> Result<()> {
        tokio::fs::write(self.view_path(name), config).await?;
        self.written.lock().await.views.insert(name.to_string());
        debug!(view = %name, "Wrote view config");
        Ok(())
    }

    async fn finish(&self) -> Result<()> {
        let written = self.written.lock().await;
        let script = groovy_script(&written.jobs, &written.views);
        tokio::fs::write(self.script_path(), script).await?;
        info!(
            path = %self.script_path().display(),
            jobs = written.jobs.len(),
            views = written.views.len(),
            "Wrote reconfiguration script"
        );
        Ok(())
    }
}

fn groovy_string(text: &str) -> String {
    format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// The script expects the `jobs/` and `views/` directories next to it,
/// passed in as the `configDir` binding or defaulting to the working
/// directory.
fn groovy_script(jobs: &BTreeSet<String>, views: &BTreeSet<String>) -> String {
    let mut script = String::new();
    script.push_str(
        "import hudson.model.View\n\
         import javax.xml.transform.stream.StreamSource\n\
         import jenkins.model.Jenkins\n\
         \n\
         def jenkins = Jenkins.get()\n\
         def configDir = binding.hasVariable('configDir') ? binding.getVariable('configDir') : '.'\n\
         \n\
         def reconfigureJob = { String name ->\n\
         \x20   def file = new File(\"${configDir}/jobs/${name}.xml\")\n\
         \x20   def job = jenkins.getItem(name)\n\
         \x20   if (job == null) {\n\
         \x20       file.withInputStream { jenkins.createProjectFromXML(name, it) }\n\
         \x20       println \"Created job ${name}\"\n\
         \x20   } else {\n\
         \x20       file.withInputStream { job.updateByXml(new StreamSource(it)) }\n\
         \x20       println \"Updated job ${name}\"\n\
         \x20   }\n\
         }\n\
         \n\
         def reconfigureView = { String name ->\n\
         \x20   def file = new File(\"${configDir}/views/${name}.xml\")\n\
         \x20   def view = jenkins.getView(name)\n\
         \x20   if (view == null) {\n\
         \x20       file.withInputStream { jenkins.addView(View.createViewFromXML(name, it)) }\n\
         \x20       println \"Created view ${name}\"\n\
         \x20   } else {\n\
         \x20       file.withInputStream { view.updateByXml(new StreamSource(it)) }\n\
         \x20       println \"Updated view ${name}\"\n\
         \x20   }\n\
         }\n\
         \n",
    );
    for job in jobs {
        let _ = writeln!(script, "reconfigureJob({})", groovy_string(job));
    }
    if !jobs.is_empty() {
        script.push('\n');
    }
    for view in views {
        let _ = writeln!(script, "reconfigureView({})", groovy_string(view));
    }
    script
}
