/// DocLayNet document element classes, in model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Caption,
    Footnote,
    Formula,
    ListItem,
    PageFooter,
    PageHeader,
    Picture,
    SectionHeader,
    Table,
    Text,
    Title,
}

impl Label {
    pub const fn name(&self) -> &'static str {
        match self {
            Label::Caption => "Caption",
            Label::Footnote => "Footnote",
            Label::Formula => "Formula",
            Label::ListItem => "List-item",
            Label::PageFooter => "Page-footer",
            Label::PageHeader => "Page-header",
            Label::Picture => "Picture",
            Label::SectionHeader => "Section-header",
            Label::Table => "Table",
            Label::Text => "Text",
            Label::Title => "Title",
        }
    }

    pub const fn label_size() -> usize {
        11
    }

    /// Maps a class index from the model output; indices past the table are `None`.
    pub const fn from_index(idx: usize) -> Option<Self> {
        let label = match idx {
            0 => Label::Caption,
            1 => Label::Footnote,
            2 => Label::Formula,
            3 => Label::ListItem,
            4 => Label::PageFooter,
            5 => Label::PageHeader,
            6 => Label::Picture,
            7 => Label::SectionHeader,
            8 => Label::Table,
            9 => Label::Text,
            10 => Label::Title,
            _ => return None,
        };
        Some(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_index_covers_all_labels() {
        for idx in 0..Label::label_size() {
            assert!(Label::from_index(idx).is_some());
        }
        assert_eq!(Label::from_index(Label::label_size()), None);
        assert_eq!(Label::from_index(8), Some(Label::Table));
        assert_eq!(Label::Table.name(), "Table");
    }
}
