use super::layout::PAGE_SIZE;

/// Fixed-size block of a table file as held by the [Pager](super::pager::Pager)
#[derive(Debug, Clone)]
pub struct Page(pub Box<[u8; PAGE_SIZE]>);

impl Page {
    pub fn zeroed() -> Self {
        Self(Box::new([0x0; PAGE_SIZE]))
    }

    /// Builds a page from a possibly short buffer; missing bytes are zero
    pub fn from_prefix(bytes: &[u8]) -> Self {
        let mut page = Self::zeroed();
        let len = bytes.len().min(PAGE_SIZE);
        page[..len].clone_from_slice(&bytes[..len]);
        page
    }
}

impl<Idx> std::ops::Index<Idx> for Page
where
    Idx: std::slice::SliceIndex<[u8]>,
{
    type Output = Idx::Output;

    fn index(&self, index: Idx) -> &Self::Output {
        &self.0[index]
    }
}

impl<Idx> std::ops::IndexMut<Idx> for Page
where
    Idx: std::slice::SliceIndex<[u8]>,
{
    fn index_mut(&mut self, index: Idx) -> &mut Self::Output {
        &mut self.0[index]
    }
}
