use std::collections::HashMap;

use crate::domain::{DestinationScope, FileCandidate, FolderContents, RemoteFile, UploadResult};
use crate::uploader::history::History;

/// View over the history's digest map answering "was this content already uploaded here?"
pub struct DedupIndex<'a> {
    history: &'a mut History,
}

impl<'a> DedupIndex<'a> {
    pub fn new(history: &'a mut History) -> Self {
        Self { history }
    }

    /// The earlier successful record for this content in `scope`, if the
    /// path's last known digest matches too. Purely local.
    pub fn find_duplicate(
        &self,
        candidate: &FileCandidate,
        digest: &str,
        scope: &DestinationScope,
    ) -> Option<&UploadResult> {
        let path_key = candidate.path_key();
        if self.history.digest(&path_key) != Some(digest) {
            return None;
        }
        // the path's own record first, then any other path holding this content
        let covering = move || {
            self.history
                .uploads
                .iter()
                .rev()
                .filter(move |record| record.covers(digest, scope))
        };
        covering()
            .find(|record| record.file_path == path_key)
            .or_else(|| covering().next())
    }

    pub fn is_duplicate(&self, candidate: &FileCandidate, digest: &str, scope: &DestinationScope) -> bool {
        self.find_duplicate(candidate, digest, scope).is_some()
    }

    pub fn record_digest(&mut self, candidate: &FileCandidate, digest: &str) {
        self.history
            .md5_sums
            .insert(candidate.path_key(), digest.to_string());
    }
}

/// What the destination folder's current contents say about one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeDecision {
    Upload,
    /// same content under the same name is already there
    AlreadyPresent(RemoteFile),
    /// same content under another name, rename it instead of transferring
    Rename(RemoteFile),
}

/// Destination folder contents indexed by md5, fetched once per run
#[derive(Debug, Default)]
pub struct RemoteProbe {
    by_md5: HashMap<String, Vec<RemoteFile>>,
}

impl RemoteProbe {
    pub fn new(contents: FolderContents) -> Self {
        let mut by_md5: HashMap<String, Vec<RemoteFile>> = HashMap::new();
        for file in contents.files {
            by_md5.entry(file.md5.clone()).or_default().push(file);
        }
        Self { by_md5 }
    }

    /// A remote file handed out for renaming is not offered again
    pub fn decide(&mut self, candidate: &FileCandidate, digest: &str, rename_existing: bool) -> ProbeDecision {
        let Some(matches) = self.by_md5.get_mut(digest) else {
            return ProbeDecision::Upload;
        };
        let name = candidate.file_name();
        if let Some(same) = matches.iter().find(|remote| remote.name == name) {
            return ProbeDecision::AlreadyPresent(same.clone());
        }
        if rename_existing && !matches.is_empty() {
            return ProbeDecision::Rename(matches.remove(0));
        }
        ProbeDecision::Upload
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rstest::rstest;

    use super::*;

    fn scope(folder: &str) -> DestinationScope {
        DestinationScope {
            account_id: "acc".to_string(),
            folder_id: folder.to_string(),
        }
    }

    fn candidate(path: &str) -> FileCandidate {
        FileCandidate::new(PathBuf::from(path), 5)
    }

    fn uploaded(path: &str, digest: &str, folder: &str) -> UploadResult {
        UploadResult {
            file_path: path.to_string(),
            upload_success: Some("ok".to_string()),
            md5: Some(digest.to_string()),
            parent_folder: Some(folder.to_string()),
            account_id: Some("acc".to_string()),
            ..Default::default()
        }
    }

    fn history() -> History {
        let mut history = History::default();
        history.md5_sums.insert("/data/a.txt".into(), "m1".into());
        history.uploads.push(uploaded("/data/a.txt", "m1", "folder-1"));
        history
    }

    #[rstest]
    #[case("/data/a.txt", "m1", "folder-1", true)]
    #[case("/data/a.txt", "m1", "folder-2", false)]
    #[case("/data/a.txt", "m9", "folder-1", false)]
    #[case("/data/b.txt", "m1", "folder-1", false)]
    fn is_duplicate_test(
        #[case] path: &str,
        #[case] digest: &str,
        #[case] folder: &str,
        #[case] expected: bool,
    ) {
        let mut history = history();
        let index = DedupIndex::new(&mut history);
        assert_eq!(expected, index.is_duplicate(&candidate(path), digest, &scope(folder)));
    }

    #[test]
    fn failed_records_never_count() {
        let mut history = history();
        history.uploads[0].upload_success = None;
        let index = DedupIndex::new(&mut history);
        assert!(!index.is_duplicate(&candidate("/data/a.txt"), "m1", &scope("folder-1")));
    }

    #[test]
    fn recorded_digest_enables_dedup_for_new_path() {
        let mut history = history();
        history.uploads.push(uploaded("/data/b.txt", "m2", "folder-1"));
        let mut index = DedupIndex::new(&mut history);
        let b = candidate("/data/b.txt");
        assert!(!index.is_duplicate(&b, "m2", &scope("folder-1")));

        index.record_digest(&b, "m2");
        assert!(index.is_duplicate(&b, "m2", &scope("folder-1")));
        assert_eq!(history.digest("/data/b.txt"), Some("m2"));
    }

    #[test]
    fn own_record_is_preferred_over_another_path() {
        let mut history = history();
        history.md5_sums.insert("/data/b.txt".into(), "m1".into());
        history.uploads.push(uploaded("/data/b.txt", "m1", "folder-1"));
        history.uploads.push(uploaded("/data/c.txt", "m1", "folder-1"));
        let index = DedupIndex::new(&mut history);

        let found = index.find_duplicate(&candidate("/data/a.txt"), "m1", &scope("folder-1"));
        assert_eq!(found.map(|r| r.file_path.as_str()), Some("/data/a.txt"));
        let found = index.find_duplicate(&candidate("/data/b.txt"), "m1", &scope("folder-1"));
        assert_eq!(found.map(|r| r.file_path.as_str()), Some("/data/b.txt"));
    }

    fn probe() -> RemoteProbe {
        RemoteProbe::new(FolderContents {
            id: "folder-1".into(),
            name: "data".into(),
            public: false,
            files: vec![RemoteFile {
                id: "r1".into(),
                name: "old-name.txt".into(),
                md5: "m1".into(),
            }],
        })
    }

    #[test]
    fn probe_plans_rename_for_same_content_other_name() {
        let decision = probe().decide(&candidate("/data/a.txt"), "m1", true);
        assert!(matches!(decision, ProbeDecision::Rename(ref remote) if remote.id == "r1"));
    }

    #[test]
    fn probe_uploads_when_rename_disabled_or_content_differs() {
        assert_eq!(probe().decide(&candidate("/data/a.txt"), "m1", false), ProbeDecision::Upload);
        assert_eq!(probe().decide(&candidate("/data/a.txt"), "m2", true), ProbeDecision::Upload);
    }

    #[test]
    fn remote_file_is_renamed_only_once() {
        let mut probe = probe();
        assert!(matches!(
            probe.decide(&candidate("/data/a.txt"), "m1", true),
            ProbeDecision::Rename(_)
        ));
        assert_eq!(probe.decide(&candidate("/data/b.txt"), "m1", true), ProbeDecision::Upload);
    }

    #[test]
    fn probe_skips_same_content_same_name() {
        let decision = probe().decide(&candidate("/data/old-name.txt"), "m1", true);
        assert!(matches!(decision, ProbeDecision::AlreadyPresent(_)));
    }
}
