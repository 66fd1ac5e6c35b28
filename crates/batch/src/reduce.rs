/// Folds `items` into one value, handing the reducer each item together with its index.
pub fn reduce<In, Out, F>(items: &[In], mut reducer: F, initial: Out) -> Out
where
    F: FnMut(Out, usize, &In) -> Out,
{
    items.iter().enumerate().fold(initial, |accum, (index, item)| reducer(accum, index, item))
}
