//! Broker key layout.
//!
//! All coordination state lives under a configurable prefix:
//!
//! ```text
//!   {prefix}/jobs                      submission log (also the id generator)
//!   {prefix}/jobs/start                start-notification queue
//!   {prefix}/jobs/{id}/args            argument list
//!   {prefix}/jobs/{id}/env             environment hash
//!   {prefix}/jobs/{id}/streams/in      client -> worker frame queue
//!   {prefix}/jobs/{id}/streams/out     worker -> client frame queue
//!   {prefix}/jobs/{id}/status          terminal status cell
//!   {prefix}/jobs/{id}/wait            completion-wait queue
//!   {prefix}/jobs/{id}/worker          claim cell (SETNX)
//! ```

pub type JobId = i64;

#[derive(Debug, Clone)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        while prefix.ends_with('/') {
            prefix.pop();
        }
        Self { prefix }
    }

    /// The submission log. `APPEND` here assigns job ids: id = new length - 1.
    pub fn jobs(&self) -> String {
        format!("{}/jobs", self.prefix)
    }

    pub fn start(&self) -> String {
        format!("{}/jobs/start", self.prefix)
    }

    pub fn args(&self, id: JobId) -> String {
        self.job_key(id, "args")
    }

    pub fn env(&self, id: JobId) -> String {
        self.job_key(id, "env")
    }

    pub fn streams_in(&self, id: JobId) -> String {
        self.job_key(id, "streams/in")
    }

    pub fn streams_out(&self, id: JobId) -> String {
        self.job_key(id, "streams/out")
    }

    pub fn status(&self, id: JobId) -> String {
        self.job_key(id, "status")
    }

    pub fn wait(&self, id: JobId) -> String {
        self.job_key(id, "wait")
    }

    /// The claim cell. Exactly one worker observes a successful SET-IF-ABSENT
    /// on this key per job.
    pub fn claim(&self, id: JobId) -> String {
        self.job_key(id, "worker")
    }

    fn job_key(&self, id: JobId, part: &str) -> String {
        format!("{}/jobs/{}/{}", self.prefix, id, part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_layout() {
        let ks = Keyspace::new("");
        assert_eq!(ks.jobs(), "/jobs");
        assert_eq!(ks.start(), "/jobs/start");
        assert_eq!(ks.args(3), "/jobs/3/args");
        assert_eq!(ks.env(3), "/jobs/3/env");
        assert_eq!(ks.streams_in(3), "/jobs/3/streams/in");
        assert_eq!(ks.streams_out(3), "/jobs/3/streams/out");
        assert_eq!(ks.status(3), "/jobs/3/status");
        assert_eq!(ks.wait(3), "/jobs/3/wait");
        assert_eq!(ks.claim(3), "/jobs/3/worker");
    }

    #[test]
    fn prefixed_layout() {
        let ks = Keyspace::new("/staging");
        assert_eq!(ks.jobs(), "/staging/jobs");
        assert_eq!(ks.claim(0), "/staging/jobs/0/worker");
    }

    #[test]
    fn trailing_slash_trimmed() {
        let ks = Keyspace::new("/staging/");
        assert_eq!(ks.jobs(), "/staging/jobs");
    }
}
