//! Package and project views
//!
//! These are not persisted: they group the persisted files of a registry.

use std::collections::BTreeMap;

use super::file::FileInfo;

/// Files sharing one package name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo<'a> {
    /// Package name, empty for the default package
    pub name: &'a str,
    /// Files in path order
    pub files: Vec<&'a FileInfo>,
}

impl PackageInfo<'_> {
    /// Statements across the package.
    pub fn statement_count(&self) -> usize {
        self.files.iter().map(|f| f.statement_count()).sum()
    }

    /// Lines across the package.
    pub fn line_count(&self) -> u64 {
        self.files.iter().map(|f| f.line_count as u64).sum()
    }
}

/// All files of a registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectInfo {
    /// Project name
    pub name: String,
    /// Files in registration order
    pub files: Vec<FileInfo>,
}

impl ProjectInfo {
    /// Empty project.
    pub fn new(name: impl Into<String>) -> Self {
        ProjectInfo {
            name: name.into(),
            files: Vec::new(),
        }
    }

    /// Add files, replacing any already present under the same path.
    pub fn add_files(&mut self, files: impl IntoIterator<Item = FileInfo>) {
        for file in files {
            match self.files.iter_mut().find(|f| f.path == file.path) {
                Some(existing) => *existing = file,
                None => self.files.push(file),
            }
        }
    }

    /// File registered under `path`.
    pub fn file(&self, path: &str) -> Option<&FileInfo> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Packages in name order.
    pub fn packages(&self) -> Vec<PackageInfo<'_>> {
        let mut by_name: BTreeMap<&str, Vec<&FileInfo>> = BTreeMap::new();
        for file in &self.files {
            by_name.entry(file.package.as_str()).or_default().push(file);
        }
        by_name
            .into_iter()
            .map(|(name, mut files)| {
                files.sort_by(|a, b| a.path.cmp(&b.path));
                PackageInfo { name, files }
            })
            .collect()
    }

    /// Coverage slots needed by the files (one past the highest slot).
    pub fn slot_count(&self) -> u32 {
        self.files.iter().map(FileInfo::slot_end).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, package: &str, data_index: u32, data_length: u32) -> FileInfo {
        FileInfo {
            path: path.into(),
            package: package.into(),
            data_index,
            data_length,
            line_count: 10,
            ..Default::default()
        }
    }

    #[test]
    fn packages_group_files_by_name() {
        let mut project = ProjectInfo::new("demo");
        project.add_files(vec![
            file("b/Z.java", "b", 0, 5),
            file("a/Y.java", "a", 5, 10),
            file("b/A.java", "b", 15, 2),
        ]);
        let packages = project.packages();
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "a");
        assert_eq!(packages[1].files[0].path, "b/A.java");
        assert_eq!(packages[1].line_count(), 20);
        assert_eq!(project.slot_count(), 17);
    }

    #[test]
    fn re_adding_a_path_replaces_it() {
        let mut project = ProjectInfo::new("demo");
        project.add_files(vec![file("a/Y.java", "a", 0, 5)]);
        project.add_files(vec![file("a/Y.java", "a", 0, 8)]);
        assert_eq!(project.files.len(), 1);
        assert_eq!(project.file("a/Y.java").map(|f| f.data_length), Some(8));
    }
}
