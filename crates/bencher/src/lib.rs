#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    file: TestFile,
    method: &'static str,
    path: &'static str,
}

impl TestCase {
    pub fn new(name: &'static str, group: TestGroup, file: TestFile, method: &'static str, path: &'static str) -> Self {
        Self { name, group, file, method, path }
    }

    pub fn small(name: &'static str, file: TestFile, method: &'static str, path: &'static str) -> Self {
        Self::new(name, TestGroup::Small, file, method, path)
    }

    pub fn large(name: &'static str, file: TestFile, method: &'static str, path: &'static str) -> Self {
        Self::new(name, TestGroup::Large, file, method, path)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    pub fn file(&self) -> &TestFile {
        &self.file
    }

    /// The method of the looked up request.
    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn path(&self) -> &'static str {
        self.path
    }
}

/// A route table, one `METHOD /pattern` per line.
#[derive(Debug, Copy, Clone)]
pub struct TestFile {
    file_name: &'static str,
    content: &'static str,
}

impl TestFile {
    pub const fn new(file_name: &'static str, content: &'static str) -> Self {
        Self { file_name, content }
    }

    pub fn content(&self) -> &'static str {
        self.content
    }

    pub fn file_name(&self) -> &'static str {
        self.file_name
    }

    pub fn routes(&self) -> impl Iterator<Item = (&'static str, &'static str)> {
        self.content.lines().filter_map(|line| line.trim().split_once(' '))
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TestGroup {
    Small,
    Large,
}
