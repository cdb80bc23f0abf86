use lime_transport::Node;
use proptest::prelude::*;

fn part() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9._-]{1,16}"
}

proptest! {
    /// Formatting then parsing a node yields an equal node.
    #[test]
    fn format_parse_identity(name in part(), domain in part(), instance in part()) {
        let node = Node::new(name, domain, instance);
        let parsed: Node = node.to_string().parse().unwrap();
        prop_assert_eq!(&parsed, &node);
    }

    /// Equality ignores ASCII case in every part.
    #[test]
    fn equality_is_case_insensitive(name in part(), domain in part(), instance in part()) {
        let lower = Node::new(name.to_lowercase(), domain.to_lowercase(), instance.to_lowercase());
        let upper = Node::new(name.to_uppercase(), domain.to_uppercase(), instance.to_uppercase());
        prop_assert_eq!(lower, upper);
    }
}
