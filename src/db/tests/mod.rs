mod migrations;

use crate::test_helpers::new_record;
