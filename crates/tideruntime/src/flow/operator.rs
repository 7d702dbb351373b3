use indexmap::IndexMap;
use tidecore::{FlowError, Value};

#[derive(Debug, Clone)]
pub enum FlowKind {
    /// Input of the flow, always operator 0
    Properties,
    /// Named source set from outside
    State { name: String },
    Field { name: String, source: usize },
    Array { items: Vec<usize> },
    Collection { values: IndexMap<String, usize> },
    Element { component: usize, props: usize },
    Constant(Value),
}

/// One operator of a flow and its users, split in three tiers.
///
/// `users[..field_end]` read a sub-field, `users[field_end..content_end]`
/// watch the content of the value, the rest only watch the value identity.
/// A user appears at most once.
#[derive(Debug, Clone)]
pub struct FlowOperator {
    pub kind: FlowKind,
    users: Vec<usize>,
    field_end: usize,
    content_end: usize,
}

impl FlowOperator {
    pub fn new(kind: FlowKind) -> Self {
        Self {
            kind,
            users: Vec::new(),
            field_end: 0,
            content_end: 0,
        }
    }

    pub fn users(&self) -> &[usize] {
        &self.users
    }

    pub fn field_users(&self) -> &[usize] {
        &self.users[..self.field_end]
    }

    pub fn content_users(&self) -> &[usize] {
        &self.users[self.field_end..self.content_end]
    }

    pub fn value_users(&self) -> &[usize] {
        &self.users[self.content_end..]
    }

    /// Users notified when the value is mutated in place
    pub fn mutation_users(&self) -> &[usize] {
        &self.users[..self.content_end]
    }

    /// Register a field user. Promoting a user already registered in any
    /// tier is refused.
    pub fn add_field_user(&mut self, user: usize, this: usize) -> Result<(), FlowError> {
        if self.users.contains(&user) {
            return Err(FlowError::AlreadyRegistered {
                user,
                source_op: this,
            });
        }
        self.users.push(user);
        let last = self.users.len() - 1;
        self.users.swap(last, self.content_end);
        self.users.swap(self.content_end, self.field_end);
        self.field_end += 1;
        self.content_end += 1;
        Ok(())
    }

    /// Register a content user, promoting it when it was a value user
    pub fn add_content_user(&mut self, user: usize) {
        match self.users.iter().position(|u| *u == user) {
            Some(index) if index >= self.content_end => {
                self.users.swap(index, self.content_end);
                self.content_end += 1;
            }
            Some(_) => {}
            None => {
                self.users.push(user);
                let last = self.users.len() - 1;
                self.users.swap(last, self.content_end);
                self.content_end += 1;
            }
        }
    }

    pub fn add_value_user(&mut self, user: usize) {
        if !self.users.contains(&user) {
            self.users.push(user);
        }
    }

    pub fn identifier(&self) -> String {
        match &self.kind {
            FlowKind::Properties => String::new(),
            FlowKind::State { name } => name.clone(),
            FlowKind::Field { name, source } => format!("#{}/{}", source, name),
            FlowKind::Array { .. } => "[array]".to_string(),
            FlowKind::Collection { .. } => "[collection]".to_string(),
            FlowKind::Element { .. } => "[element]".to_string(),
            FlowKind::Constant(_) => "[constant]".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_stay_contiguous() {
        let mut op = FlowOperator::new(FlowKind::Properties);
        op.add_value_user(1);
        op.add_content_user(2);
        op.add_field_user(3, 0).unwrap();
        op.add_value_user(4);
        op.add_field_user(5, 0).unwrap();

        let mut fields = op.field_users().to_vec();
        fields.sort();
        assert_eq!(fields, vec![3, 5]);
        assert_eq!(op.content_users(), &[2]);
        let mut values = op.value_users().to_vec();
        values.sort();
        assert_eq!(values, vec![1, 4]);
    }

    #[test]
    fn value_users_can_become_content_users() {
        let mut op = FlowOperator::new(FlowKind::Properties);
        op.add_value_user(1);
        op.add_value_user(2);
        op.add_content_user(2);
        op.add_content_user(2);

        assert_eq!(op.content_users(), &[2]);
        assert_eq!(op.value_users(), &[1]);
        assert_eq!(op.users().len(), 2, "no duplicates");
    }

    #[test]
    fn registered_users_cannot_become_field_users() {
        let mut op = FlowOperator::new(FlowKind::Properties);
        op.add_value_user(1);
        assert_eq!(
            op.add_field_user(1, 0),
            Err(FlowError::AlreadyRegistered { user: 1, source_op: 0 })
        );
    }
}
