pub struct Rule<T: ?Sized> {
    pub name: &'static str,
    predicate: Box<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: ?Sized> Rule<T> {
    pub fn new(name: &'static str, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name,
            predicate: Box::new(predicate),
        }
    }

    pub fn check(&self, subject: &T) -> bool {
        (self.predicate)(subject)
    }
}

impl<T: ?Sized> std::fmt::Debug for Rule<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

#[derive(Debug)]
pub struct RuleChain<T: ?Sized> {
    rules: Vec<Rule<T>>,
}

impl<T: ?Sized> Default for RuleChain<T> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<T: ?Sized> RuleChain<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        name: &'static str,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.rules.push(Rule::new(name, predicate));
        self
    }

    pub fn first_match(&self, subject: &T) -> Option<&'static str> {
        self.rules
            .iter()
            .find(|rule| rule.check(subject))
            .map(|rule| rule.name)
    }

    pub fn first_failure(&self, subject: &T) -> Option<&'static str> {
        self.rules
            .iter()
            .find(|rule| !rule.check(subject))
            .map(|rule| rule.name)
    }

    pub fn any(&self, subject: &T) -> bool {
        self.first_match(subject).is_some()
    }

    pub fn all(&self, subject: &T) -> bool {
        self.first_failure(subject).is_none()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
